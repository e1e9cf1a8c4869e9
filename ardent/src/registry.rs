//! Lazily established connections.
//!
//! Each adapter owns a [`Registry`] mapping a [`ConnectionKey`] to an
//! established client (usually a connection pool).  The first lookup for
//! a key connects; later lookups share the cached client.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::Error;

/// A configured connection name within an environment.
///
/// An environment of `None` stands for the configuration's active
/// environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey {
    pub name: String,
    pub environment: Option<String>,
}

impl ConnectionKey {
    pub fn new<N: Into<String>>(name: N, environment: Option<&str>) -> Self {
        ConnectionKey {
            name: name.into(),
            environment: environment.map(str::to_string),
        }
    }

    /// The default connection in the active environment.
    pub fn default_connection() -> Self {
        ConnectionKey::new("default", None)
    }

    /// The key with its environment resolved.
    pub fn resolve(&self, active_environment: &str) -> ConnectionKey {
        ConnectionKey {
            name: self.name.clone(),
            environment: Some(
                self.environment
                    .clone()
                    .unwrap_or_else(|| active_environment.to_string()),
            ),
        }
    }

    /// The identifier used in logs, `{env}_{backend}_{name}`.
    pub fn label(&self, backend: &str) -> String {
        format!(
            "{}_{}_{}",
            self.environment.as_deref().unwrap_or("active"),
            backend,
            self.name
        )
    }
}

impl Default for ConnectionKey {
    fn default() -> Self {
        ConnectionKey::default_connection()
    }
}

/// A cache of established clients.
#[derive(Debug)]
pub struct Registry<C> {
    clients: RwLock<HashMap<ConnectionKey, C>>,
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Registry {
            clients: RwLock::new(HashMap::new()),
        }
    }
}

impl<C: Clone> Registry<C> {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Get the client for a key, connecting if there isn't one yet.
    ///
    /// `connect` runs without holding the lock.  If two callers race to
    /// connect the same key, the first insert wins and the other client
    /// is dropped.  A failed connect leaves nothing behind, so the next
    /// call tries again.
    pub fn get_or_connect<F>(&self, key: &ConnectionKey, connect: F) -> Result<C, Error>
    where
        F: FnOnce(&ConnectionKey) -> Result<C, Error>,
    {
        if let Some(client) = self.clients.read().get(key) {
            return Ok(client.clone());
        }

        let client = connect(key)?;

        let mut clients = self.clients.write();
        if clients.contains_key(key) {
            tracing::warn!(connection = ?key, "dropping redundant connection");
        }
        Ok(clients.entry(key.clone()).or_insert(client).clone())
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<C> {
        self.clients.read().get(key).cloned()
    }

    /// Register an already established client.
    pub fn insert(&self, key: ConnectionKey, client: C) -> Option<C> {
        self.clients.write().insert(key, client)
    }

    pub fn contains(&self, key: &ConnectionKey) -> bool {
        self.clients.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    pub fn clear(&self) {
        self.clients.write().clear();
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn connects_once_per_key() {
        let registry = Registry::<Arc<usize>>::new();
        let connects = AtomicUsize::new(0);
        let connect = |_: &ConnectionKey| {
            let n = connects.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(n))
        };

        let dev = ConnectionKey::new("default", Some("dev"));
        let test = ConnectionKey::new("default", Some("test"));

        let a = registry.get_or_connect(&dev, connect).unwrap();
        let b = registry.get_or_connect(&dev, connect).unwrap();
        let c = registry.get_or_connect(&test, connect).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(2, connects.load(Ordering::SeqCst));
        assert_eq!(2, registry.len());
    }

    #[test]
    fn failures_are_not_cached() {
        let registry = Registry::<u8>::new();
        let key = ConnectionKey::default();

        let err = registry
            .get_or_connect(&key, |_| Err(Error::connect_str("refused")))
            .unwrap_err();
        assert_eq!(crate::ErrorKind::Connect, err.kind());
        assert!(registry.is_empty());

        assert_eq!(7, registry.get_or_connect(&key, |_| Ok(7)).unwrap());
        assert!(registry.contains(&key));
    }

    #[test]
    fn concurrent_connects_share_one_client() {
        let registry = Arc::new(Registry::<Arc<String>>::new());
        let key = ConnectionKey::new("default", Some("dev"));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let key = key.clone();
                std::thread::spawn(move || {
                    registry
                        .get_or_connect(&key, |_| Ok(Arc::new(format!("client {i}"))))
                        .unwrap()
                })
            })
            .collect();

        let clients: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(clients.iter().all(|c| Arc::ptr_eq(c, &clients[0])));
        assert_eq!(1, registry.len());
    }

    #[test]
    fn resolving_the_active_environment() {
        let key = ConnectionKey::default().resolve("dev");
        assert_eq!(Some("dev".to_string()), key.environment);
        assert_eq!("dev_sqlite_default", key.label("sqlite"));

        let pinned = ConnectionKey::new("reports", Some("prod")).resolve("dev");
        assert_eq!(Some("prod".to_string()), pinned.environment);
    }
}
