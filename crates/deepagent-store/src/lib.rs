//! In-memory implementation of `Store`, the cross-invocation key-value store
//! used by the Skills/Memory middleware and available to tools via
//! `ToolRuntime::store`.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use deepagent_core::{now_iso8601, DeepAgentError, Item, Store};
use serde_json::Value;

fn ns_key(namespace: &[&str]) -> Vec<String> {
    namespace.iter().map(|s| s.to_string()).collect()
}

struct Entry {
    value: Value,
    created_at: String,
    updated_at: String,
}

/// Process-local `Store` backed by a `HashMap` keyed on `(namespace, key)`.
/// Suitable for tests and single-process deployments; not persisted across
/// restarts.
pub struct InMemoryStore {
    items: RwLock<HashMap<(Vec<String>, String), Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, namespace: &[&str], key: &str) -> Result<Option<Item>, DeepAgentError> {
        let items = self.items.read().map_err(|_| DeepAgentError::Store("lock poisoned".into()))?;
        let ns = ns_key(namespace);
        Ok(items.get(&(ns.clone(), key.to_string())).map(|e| Item {
            namespace: ns,
            key: key.to_string(),
            value: e.value.clone(),
            created_at: e.created_at.clone(),
            updated_at: e.updated_at.clone(),
        }))
    }

    async fn search(
        &self,
        namespace: &[&str],
        query: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Item>, DeepAgentError> {
        let items = self.items.read().map_err(|_| DeepAgentError::Store("lock poisoned".into()))?;
        let ns = ns_key(namespace);
        let mut results: Vec<Item> = items
            .iter()
            .filter(|((item_ns, _), _)| *item_ns == ns)
            .filter(|(_, entry)| match query {
                Some(q) => entry.value.to_string().to_lowercase().contains(&q.to_lowercase()),
                None => true,
            })
            .map(|((item_ns, key), entry)| Item {
                namespace: item_ns.clone(),
                key: key.clone(),
                value: entry.value.clone(),
                created_at: entry.created_at.clone(),
                updated_at: entry.updated_at.clone(),
            })
            .collect();
        results.sort_by(|a, b| a.key.cmp(&b.key));
        results.truncate(limit);
        Ok(results)
    }

    async fn put(&self, namespace: &[&str], key: &str, value: Value) -> Result<(), DeepAgentError> {
        let mut items = self.items.write().map_err(|_| DeepAgentError::Store("lock poisoned".into()))?;
        let ns = ns_key(namespace);
        let now = now_iso8601();
        let map_key = (ns, key.to_string());
        match items.get_mut(&map_key) {
            Some(entry) => {
                entry.value = value;
                entry.updated_at = now;
            }
            None => {
                items.insert(
                    map_key,
                    Entry {
                        value,
                        created_at: now.clone(),
                        updated_at: now,
                    },
                );
            }
        }
        Ok(())
    }

    async fn delete(&self, namespace: &[&str], key: &str) -> Result<(), DeepAgentError> {
        let mut items = self.items.write().map_err(|_| DeepAgentError::Store("lock poisoned".into()))?;
        items.remove(&(ns_key(namespace), key.to_string()));
        Ok(())
    }

    async fn list_namespaces(&self, prefix: &[&str]) -> Result<Vec<Vec<String>>, DeepAgentError> {
        let items = self.items.read().map_err(|_| DeepAgentError::Store("lock poisoned".into()))?;
        let prefix = ns_key(prefix);
        let mut namespaces: Vec<Vec<String>> = items
            .keys()
            .map(|(ns, _)| ns.clone())
            .filter(|ns| ns.len() >= prefix.len() && ns[..prefix.len()] == prefix[..])
            .collect();
        namespaces.sort();
        namespaces.dedup();
        Ok(namespaces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_and_get_returns_stored_value() {
        let store = InMemoryStore::new();
        store.put(&["users", "settings"], "theme", json!("dark")).await.unwrap();
        let item = store.get(&["users", "settings"], "theme").await.unwrap().unwrap();
        assert_eq!(item.key, "theme");
        assert_eq!(item.value, json!("dark"));
        assert_eq!(item.namespace, vec!["users", "settings"]);
    }

    #[tokio::test]
    async fn get_nonexistent_key_returns_none() {
        let store = InMemoryStore::new();
        assert!(store.get(&["ns"], "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_item() {
        let store = InMemoryStore::new();
        store.put(&["ns"], "k", json!(42)).await.unwrap();
        store.delete(&["ns"], "k").await.unwrap();
        assert!(store.get(&["ns"], "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_nonexistent_key_is_noop() {
        let store = InMemoryStore::new();
        assert!(store.delete(&["ns"], "ghost").await.is_ok());
    }

    #[tokio::test]
    async fn upsert_updates_value_and_preserves_created_at() {
        let store = InMemoryStore::new();
        store.put(&["ns"], "k", json!("v1")).await.unwrap();
        let first = store.get(&["ns"], "k").await.unwrap().unwrap();
        store.put(&["ns"], "k", json!("v2")).await.unwrap();
        let second = store.get(&["ns"], "k").await.unwrap().unwrap();
        assert_eq!(second.value, json!("v2"));
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn search_with_query_filters_by_substring() {
        let store = InMemoryStore::new();
        store.put(&["items"], "a", json!("apple pie")).await.unwrap();
        store.put(&["items"], "b", json!("banana split")).await.unwrap();
        let results = store.search(&["items"], Some("apple"), 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].value, json!("apple pie"));
    }

    #[tokio::test]
    async fn search_respects_limit() {
        let store = InMemoryStore::new();
        for i in 0..10 {
            store.put(&["ns"], &format!("k{i}"), json!(format!("item{i}"))).await.unwrap();
        }
        let results = store.search(&["ns"], None, 3).await.unwrap();
        assert!(results.len() <= 3);
    }

    #[tokio::test]
    async fn list_namespaces_with_prefix_filters() {
        let store = InMemoryStore::new();
        store.put(&["app", "users"], "k1", json!(1)).await.unwrap();
        store.put(&["app", "config"], "k2", json!(2)).await.unwrap();
        store.put(&["system", "logs"], "k3", json!(3)).await.unwrap();

        let filtered = store.list_namespaces(&["app"]).await.unwrap();
        assert_eq!(filtered.len(), 2);
        for ns in &filtered {
            assert_eq!(ns[0], "app");
        }
    }

    #[tokio::test]
    async fn items_in_different_namespaces_are_isolated() {
        let store = InMemoryStore::new();
        store.put(&["ns1"], "key", json!("value1")).await.unwrap();
        store.put(&["ns2"], "key", json!("value2")).await.unwrap();
        store.delete(&["ns1"], "key").await.unwrap();
        assert!(store.get(&["ns1"], "key").await.unwrap().is_none());
        assert!(store.get(&["ns2"], "key").await.unwrap().is_some());
    }
}
