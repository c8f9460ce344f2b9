//! cloudsight-index: Resource lookup and cross-reference resolution.
//!
//! Builds a `type_name`-keyed index over the full resource set and resolves
//! the textual pointers embedded in attribute values into canonical keys.
//! Interpolation references are resolved once at build time and cached with
//! a reverse map, so downstream crates ask "who references me?" without
//! re-parsing strings.

pub mod error;
pub mod reference;

use std::collections::{BTreeMap, BTreeSet};

use cloudsight_core::{Resource, ResourceKey};

pub use error::IndexError;
pub use reference::{Reference, ReferenceKind, TypedFragment, TYPE_VOCABULARY};

/// Immutable index over one analysis run's resources.
#[derive(Debug, Default)]
pub struct ResourceIndex {
    resources: BTreeMap<ResourceKey, Resource>,
    references: BTreeMap<ResourceKey, Vec<Reference>>,
    referrers: BTreeMap<ResourceKey, BTreeSet<ResourceKey>>,
}

impl ResourceIndex {
    /// Index `resources` and resolve every embedded reference.
    ///
    /// Duplicate `type_name` keys are a caller error.
    pub fn build(resources: Vec<Resource>) -> error::Result<Self> {
        let mut index = ResourceIndex::default();

        for resource in resources {
            let key = resource.key();
            if index.resources.contains_key(&key) {
                return Err(IndexError::DuplicateKey { key: key.0 });
            }
            index.resources.insert(key, resource);
        }

        let mut references = BTreeMap::new();
        for (key, resource) in &index.resources {
            references.insert(key.clone(), index.collect_references(resource));
        }

        let mut referrers: BTreeMap<ResourceKey, BTreeSet<ResourceKey>> = BTreeMap::new();
        let mut unresolved = 0usize;
        for (source, refs) in &references {
            for reference in refs {
                match &reference.resolved {
                    Some(target) if target != source => {
                        referrers.entry(target.clone()).or_default().insert(source.clone());
                    }
                    Some(_) => {}
                    None => unresolved += 1,
                }
            }
        }

        index.references = references;
        index.referrers = referrers;

        tracing::debug!(
            resources = index.resources.len(),
            unresolved_references = unresolved,
            "Resource index built"
        );

        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn lookup(&self, key: &ResourceKey) -> Option<&Resource> {
        self.resources.get(key)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.resources.contains_key(key)
    }

    /// All resources in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&ResourceKey, &Resource)> {
        self.resources.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.resources.keys()
    }

    /// Resources of exactly `resource_type`, in key order.
    pub fn of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a Resource> + 'a {
        self.resources
            .values()
            .filter(move |r| r.resource_type == resource_type)
    }

    /// Resolve a textual reference to a canonical key.
    ///
    /// Scans for a `<type>.<name>` fragment first; when none resolves, falls
    /// back to substring containment of each indexed resource's local (or
    /// `name` attribute) name in `text`, preferring the longest match. The
    /// fallback is a linear scan per call.
    pub fn resolve_reference(
        &self,
        text: &str,
        expected_type_prefix: Option<&str>,
    ) -> Option<ResourceKey> {
        let type_ok = |t: &str| expected_type_prefix.map_or(true, |p| t.starts_with(p));

        for fragment in reference::scan_fragments(text) {
            if !type_ok(&fragment.resource_type) {
                continue;
            }
            let key = fragment.key();
            if self.resources.contains_key(&key) {
                return Some(key);
            }
        }

        if text.is_empty() {
            return None;
        }

        let mut best: Option<(&ResourceKey, usize)> = None;
        for (key, resource) in &self.resources {
            if !type_ok(&resource.resource_type) {
                continue;
            }
            let matched = [resource.name.as_str(), resource.display_name()]
                .into_iter()
                .filter(|n| !n.is_empty() && text.contains(n))
                .map(str::len)
                .max();
            if let Some(len) = matched {
                if best.map_or(true, |(_, best_len)| len > best_len) {
                    best = Some((key, len));
                }
            }
        }

        match best {
            Some((key, _)) => Some(key.clone()),
            None => {
                tracing::debug!(reference = %text, expected = ?expected_type_prefix, "Unresolved reference");
                None
            }
        }
    }

    /// Resolve a dependency entry: a canonical key or a `type.name` reference.
    pub fn resolve_dependency(&self, dependency: &str) -> Option<ResourceKey> {
        let direct = ResourceKey::from(dependency);
        if self.resources.contains_key(&direct) {
            return Some(direct);
        }
        reference::scan_fragments(dependency)
            .into_iter()
            .map(|f| f.key())
            .find(|k| self.resources.contains_key(k))
    }

    /// References discovered in `key`'s attributes and dependency list.
    pub fn references(&self, key: &ResourceKey) -> &[Reference] {
        self.references.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resources whose attributes or dependencies resolve to `key`.
    pub fn referrers(&self, key: &ResourceKey) -> impl Iterator<Item = &Resource> {
        self.referrers
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|k| self.resources.get(k))
    }

    /// Referrers of exactly `resource_type`.
    pub fn referrers_of_type<'a>(
        &'a self,
        key: &ResourceKey,
        resource_type: &'a str,
    ) -> Vec<&'a Resource> {
        self.referrers(key)
            .filter(|r| r.resource_type == resource_type)
            .collect()
    }

    fn collect_references(&self, resource: &Resource) -> Vec<Reference> {
        let mut refs = Vec::new();

        resource.walk_strings(&mut |path, value| {
            for fragment in reference::scan_fragments(value) {
                let key = fragment.key();
                let resolved = self.resources.contains_key(&key).then_some(key);
                refs.push(Reference {
                    kind: ReferenceKind::Interpolation,
                    attribute_path: path.to_string(),
                    target_type: fragment.resource_type,
                    target_name: fragment.name,
                    resolved,
                });
            }
        });

        for dependency in &resource.dependencies {
            let resolved = self.resolve_dependency(dependency);
            let (target_type, target_name) = match resolved.as_ref().and_then(|k| self.resources.get(k)) {
                Some(target) => (target.resource_type.clone(), target.name.clone()),
                None => (String::new(), dependency.clone()),
            };
            refs.push(Reference {
                kind: ReferenceKind::Dependency,
                attribute_path: String::new(),
                target_type,
                target_name,
                resolved,
            });
        }

        refs
    }
}
