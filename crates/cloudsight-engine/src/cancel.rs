//! Last-request-wins supervision of analysis runs.
//!
//! Every run takes a ticket carrying the generation current at its start.
//! Starting a newer run bumps the generation, which supersedes every older
//! ticket. Runs check their ticket between stages and abort early; callers
//! check it again before delivering a result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{EngineError, Result};

/// Issues run tickets. Clones share one generation counter.
#[derive(Debug, Clone, Default)]
pub struct RunSupervisor {
    generation: Arc<AtomicU64>,
}

impl RunSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new run, superseding all in-flight ones.
    pub fn begin(&self) -> RunTicket {
        let run = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        RunTicket {
            run,
            generation: Arc::clone(&self.generation),
        }
    }

    /// Supersede every in-flight run without starting a new one.
    pub fn cancel_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Handle held by one run.
#[derive(Debug, Clone)]
pub struct RunTicket {
    run: u64,
    generation: Arc<AtomicU64>,
}

impl RunTicket {
    pub fn run(&self) -> u64 {
        self.run
    }

    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.run
    }

    /// `Err(Superseded)` once a newer run has started.
    pub fn check(&self) -> Result<()> {
        let latest = self.generation.load(Ordering::SeqCst);
        if latest == self.run {
            Ok(())
        } else {
            Err(EngineError::Superseded {
                run: self.run,
                latest,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_ticket_supersedes() {
        let supervisor = RunSupervisor::new();
        let first = supervisor.begin();
        assert!(first.is_current());

        let second = supervisor.begin();
        assert!(!first.is_current());
        assert!(second.is_current());
        assert!(matches!(
            first.check(),
            Err(EngineError::Superseded { run: 1, latest: 2 })
        ));
        assert!(second.check().is_ok());
    }

    #[test]
    fn test_cancel_all() {
        let supervisor = RunSupervisor::new();
        let ticket = supervisor.begin();
        supervisor.cancel_all();
        assert!(ticket.check().unwrap_err().is_superseded());
        assert_eq!(supervisor.current(), 2);
    }

    #[test]
    fn test_clones_share_generation() {
        let supervisor = RunSupervisor::new();
        let ticket = supervisor.begin();
        supervisor.clone().begin();
        assert!(!ticket.is_current());
    }
}
