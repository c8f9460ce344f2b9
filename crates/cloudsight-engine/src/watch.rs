//! Re-run analysis whenever an input file changes.
//!
//! Polls the file's modification time on a tokio interval. Each change
//! starts a new run on the blocking pool and supersedes any run still in
//! flight; superseded results are dropped when collected.

use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::error::{EngineError, Result};
use crate::types::{AnalysisReport, ReportEnvelope};
use crate::{read_resources, AnalysisEngine, RunTicket};

struct InFlight {
    ticket: RunTicket,
    started: Instant,
    handle: JoinHandle<Result<AnalysisReport>>,
}

/// Watches one resources file and re-analyzes it on change.
pub struct Watcher {
    engine: AnalysisEngine,
    path: PathBuf,
    interval: Duration,
    last_modified: Option<SystemTime>,
    in_flight: Vec<InFlight>,
}

impl Watcher {
    pub fn new(engine: AnalysisEngine, path: impl Into<PathBuf>) -> Self {
        let interval = Duration::from_millis(engine.config().watch_interval_ms.max(1));
        Self {
            engine,
            path: path.into(),
            interval,
            last_modified: None,
            in_flight: Vec::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Poll forever, handing each current report to `on_report`.
    pub async fn run<F>(mut self, mut on_report: F) -> Result<()>
    where
        F: FnMut(ReportEnvelope),
    {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(path = %self.path.display(), interval_ms = self.interval.as_millis() as u64, "Watching input");

        loop {
            ticker.tick().await;
            match self.poll().await {
                Ok(reports) => reports.into_iter().for_each(&mut on_report),
                Err(e) => tracing::error!(path = %self.path.display(), error = %e, "Watch poll failed"),
            }
        }
    }

    /// One poll step: start a run if the file changed, then collect every
    /// finished run. Only a still-current run yields a report.
    pub async fn poll(&mut self) -> Result<Vec<ReportEnvelope>> {
        if let Some(modified) = self.changed().await? {
            self.start_run(modified).await?;
        }
        self.collect(false).await
    }

    /// Wait for every in-flight run and return the current one's report.
    pub async fn drain(&mut self) -> Result<Vec<ReportEnvelope>> {
        self.collect(true).await
    }

    /// The file's modification time when it differs from the last one
    /// successfully read.
    async fn changed(&self) -> Result<Option<SystemTime>> {
        let path = self.path.clone();
        let modified = tokio::task::spawn_blocking(move || std::fs::metadata(&path)?.modified())
            .await
            .map_err(|e| EngineError::Task(e.to_string()))??;

        Ok((self.last_modified != Some(modified)).then_some(modified))
    }

    /// Read the file and start a run. `modified` is recorded only once the
    /// read succeeds, so a partially written file is retried on the next poll.
    async fn start_run(&mut self, modified: SystemTime) -> Result<()> {
        let path = self.path.clone();
        let resources = tokio::task::spawn_blocking(move || read_resources(&path))
            .await
            .map_err(|e| EngineError::Task(e.to_string()))??;
        self.last_modified = Some(modified);

        let ticket = self.engine.supervisor().begin();
        tracing::info!(run = ticket.run(), resources = resources.len(), "Input changed; starting analysis");

        let engine = self.engine.clone();
        let task_ticket = ticket.clone();
        let handle = tokio::task::spawn_blocking(move || engine.analyze_with_ticket(resources, &task_ticket));
        self.in_flight.push(InFlight {
            ticket,
            started: Instant::now(),
            handle,
        });
        Ok(())
    }

    async fn collect(&mut self, wait: bool) -> Result<Vec<ReportEnvelope>> {
        let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition(|run| wait || run.handle.is_finished());
        self.in_flight = pending;

        let mut reports = Vec::new();
        for run in ready {
            let outcome = run.handle.await.map_err(|e| EngineError::Task(e.to_string()))?;
            if !run.ticket.is_current() {
                tracing::warn!(run = run.ticket.run(), "Discarding superseded analysis result");
                continue;
            }
            match outcome {
                Ok(report) => {
                    let duration_ms = run.started.elapsed().as_millis() as u64;
                    reports.push(ReportEnvelope::new(report, duration_ms));
                }
                Err(e) if e.is_superseded() => {
                    tracing::warn!(run = run.ticket.run(), "Analysis superseded");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsight_core::AnalysisConfig;
    use std::fs::File;
    use std::time::Duration as StdDuration;

    const ONE: &str = r#"[{"type": "azurerm_storage_account", "name": "a", "attributes": {}}]"#;
    const TWO: &str = r#"[
        {"type": "azurerm_storage_account", "name": "a", "attributes": {}},
        {"type": "azurerm_key_vault", "name": "kv", "attributes": {}}
    ]"#;

    fn write(path: &Path, content: &str, offset_secs: u64) {
        std::fs::write(path, content).unwrap();
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + StdDuration::from_secs(1_700_000_000 + offset_secs))
            .unwrap();
    }

    fn engine() -> AnalysisEngine {
        AnalysisEngine::new(AnalysisConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_change_triggers_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.json");
        write(&path, ONE, 0);

        let mut watcher = Watcher::new(engine(), &path);
        let mut reports = watcher.poll().await.unwrap();
        reports.extend(watcher.drain().await.unwrap());
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].report.resource_count, 1);

        // Unchanged file: no new run.
        assert!(watcher.poll().await.unwrap().is_empty());
        assert!(watcher.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_newer_change_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.json");
        write(&path, ONE, 0);

        let mut watcher = Watcher::new(engine(), &path);
        let first = watcher.changed().await.unwrap().unwrap();
        watcher.start_run(first).await.unwrap();

        write(&path, TWO, 10);
        let second = watcher.changed().await.unwrap().unwrap();
        watcher.start_run(second).await.unwrap();

        let reports = watcher.drain().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].report.resource_count, 2);
    }

    #[tokio::test]
    async fn test_partial_write_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.json");
        write(&path, &ONE[..20], 0);

        let mut watcher = Watcher::new(engine(), &path);
        assert!(matches!(watcher.poll().await, Err(EngineError::Core(_))));

        // Same mtime, now complete: the failed read must not count as seen.
        write(&path, ONE, 0);
        let mut reports = watcher.poll().await.unwrap();
        reports.extend(watcher.drain().await.unwrap());
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].report.resource_count, 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = Watcher::new(engine(), dir.path().join("absent.json"));
        assert!(matches!(watcher.poll().await, Err(EngineError::Io(_))));
    }
}
