use serde::de::DeserializeOwned;
use serde::Serialize;

use super::key::NamespaceKey;

/// A single logical table backed by one shared `sled::Db`. Keys are encoded
/// as `"{name}.v{version}:{prefix}{key}"`; subspaces extend `prefix` with a
/// `\0` separator, producing a tree of tables that all share the same
/// backing store and support prefix iteration.
#[derive(Clone)]
pub struct Namespace {
    db: sled::Db,
    name: String,
    version: u32,
    prefix: String,
}

impl Namespace {
    pub(super) fn new(db: sled::Db, name: String, version: u32, prefix: String) -> Self {
        Self {
            db,
            name,
            version,
            prefix,
        }
    }

    /// Returns a subspace nested under this namespace, sharing the same
    /// backing store but scoped to keys under an additional prefix segment.
    pub fn subspace(&self, segment: impl NamespaceKey) -> Namespace {
        let mut prefix = self.prefix.clone();
        prefix.push_str(&segment.to_key_string());
        prefix.push('\0');
        Namespace::new(self.db.clone(), self.name.clone(), self.version, prefix)
    }

    fn encode_key(&self, key: &impl NamespaceKey) -> Vec<u8> {
        format!(
            "{}.v{}:{}{}",
            self.name,
            self.version,
            self.prefix,
            key.to_key_string()
        )
        .into_bytes()
    }

    fn range_prefix(&self) -> Vec<u8> {
        format!("{}.v{}:{}", self.name, self.version, self.prefix).into_bytes()
    }

    fn decode_key(&self, raw: &[u8]) -> anyhow::Result<String> {
        let full = std::str::from_utf8(raw)?;
        let (_, rest) = full
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("malformed namespace key: {full}"))?;
        let without_prefix = rest
            .strip_prefix(&self.prefix)
            .ok_or_else(|| anyhow::anyhow!("key {rest} outside of namespace prefix"))?;
        Ok(without_prefix.to_string())
    }

    pub fn put<V: Serialize>(&self, key: impl NamespaceKey, value: &V) -> anyhow::Result<()> {
        let encoded = bincode::serialize(value)?;
        self.db.insert(self.encode_key(&key), encoded)?;
        Ok(())
    }

    pub fn get<V: DeserializeOwned>(&self, key: impl NamespaceKey) -> anyhow::Result<Option<V>> {
        match self.db.get(self.encode_key(&key))? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, key: impl NamespaceKey) -> anyhow::Result<()> {
        self.db.remove(self.encode_key(&key))?;
        Ok(())
    }

    pub fn contains(&self, key: impl NamespaceKey) -> anyhow::Result<bool> {
        Ok(self.db.contains_key(self.encode_key(&key))?)
    }

    /// Iterates every `(key, value)` pair stored under this namespace,
    /// scoped to the current prefix via `sled`'s prefix range scan.
    pub fn list<V: DeserializeOwned>(
        &self,
    ) -> anyhow::Result<impl Iterator<Item = anyhow::Result<(String, V)>> + '_> {
        let prefix = self.range_prefix();
        Ok(self.db.scan_prefix(prefix).map(move |entry| {
            let (raw_key, raw_value) = entry?;
            let key = self.decode_key(&raw_key)?;
            let value: V = bincode::deserialize(&raw_value)?;
            Ok((key, value))
        }))
    }

    /// Convenience form of `list` that collects keys only.
    pub fn list_keys(&self) -> anyhow::Result<Vec<String>> {
        let prefix = self.range_prefix();
        self.db
            .scan_prefix(prefix)
            .map(|entry| {
                let (raw_key, _) = entry?;
                self.decode_key(&raw_key)
            })
            .collect()
    }

    pub fn flush(&self) -> anyhow::Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn put_then_get_roundtrips() {
        let store = Store::open_temporary().unwrap();
        let ns = store.namespace("QueryCache", 0).unwrap();
        ns.put("black lotus", &vec!["url1".to_string(), "url2".to_string()])
            .unwrap();
        let value: Option<Vec<String>> = ns.get("black lotus").unwrap();
        assert_eq!(value, Some(vec!["url1".to_string(), "url2".to_string()]));
    }

    #[test]
    fn delete_then_get_is_absent() {
        let store = Store::open_temporary().unwrap();
        let ns = store.namespace("CacheMap", 0).unwrap();
        ns.put("k", &"v".to_string()).unwrap();
        ns.delete("k").unwrap();
        let value: Option<String> = ns.get("k").unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn subspaces_do_not_leak_into_each_other() {
        let store = Store::open_temporary().unwrap();
        let games = store.namespace("Games", 0).unwrap();
        let scope_a = games.subspace("scope-a");
        let scope_b = games.subspace("scope-b");

        scope_a.put("g1", &42i64).unwrap();
        assert_eq!(scope_b.get::<i64>("g1").unwrap(), None);
        assert_eq!(scope_a.get::<i64>("g1").unwrap(), Some(42));
    }

    #[test]
    fn list_scopes_to_prefix() {
        let store = Store::open_temporary().unwrap();
        let games = store.namespace("Games", 0).unwrap();
        let scope_a = games.subspace("scope-a");
        let scope_b = games.subspace("scope-b");
        scope_a.put("g1", &1i64).unwrap();
        scope_a.put("g2", &2i64).unwrap();
        scope_b.put("g3", &3i64).unwrap();

        let mut keys = scope_a.list_keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["g1".to_string(), "g2".to_string()]);
    }
}
