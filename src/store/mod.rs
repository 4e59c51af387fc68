//! Namespace store: versioned, hierarchical partitioning of a single
//! embedded ordered KV store (`sled`) into typed logical tables.
//!
//! Grounded on the same "one backing handle, many typed sub-stores behind
//! trait objects" shape the teacher uses for `ledger::store::{EventStore,
//! SnapshotStore}` — here generalized from two fixed tables to an
//! arbitrary, self-describing set of named namespaces.

mod key;
mod namespace;

pub use key::NamespaceKey;
pub use namespace::Namespace;

use std::path::Path;

const META_NAMESPACE: &str = "__meta__";

/// Opens the on-disk `sled` database once and hands out `Namespace` handles
/// against it. All namespaces opened through the same `Store` share one
/// backing file, matching the spec's "one backing store shared by a tree
/// of logical tables".
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Returns a handle to an in-memory-only store, for tests.
    pub fn open_temporary() -> anyhow::Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Opens (creating if absent) a namespace at version 0 with an empty
    /// prefix, recording its existence in the meta-namespace so a restart
    /// can enumerate every namespace ever created without explicit wiring.
    pub fn namespace(&self, name: &str, version: u32) -> anyhow::Result<Namespace> {
        if name == META_NAMESPACE {
            anyhow::bail!("namespace name '{META_NAMESPACE}' is reserved");
        }
        if name.contains(':') {
            anyhow::bail!("namespace name must not contain ':'");
        }
        self.record_namespace(name, version)?;
        Ok(Namespace::new(self.db.clone(), name.to_string(), version, String::new()))
    }

    fn record_namespace(&self, name: &str, version: u32) -> anyhow::Result<()> {
        let meta = Namespace::new(self.db.clone(), META_NAMESPACE.to_string(), 0, String::new());
        meta.put(name, &(name.to_string(), version))?;
        Ok(())
    }

    /// Lists every non-meta namespace name ever created against this store.
    pub fn list_namespaces(&self) -> anyhow::Result<Vec<(String, u32)>> {
        let meta = Namespace::new(self.db.clone(), META_NAMESPACE.to_string(), 0, String::new());
        let mut out = Vec::new();
        for entry in meta.list::<(String, u32)>()? {
            let (_, value) = entry?;
            out.push(value);
        }
        Ok(out)
    }
}
