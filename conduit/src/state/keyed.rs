//! Key-value map owned by a serializing service.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use conduit_config::shared::ServiceConfig;

use crate::conduit_error;
use crate::error::{ConduitError, ConduitResult, ErrorKind};
use crate::state::service::{self, RequestHandler, ServiceHandle};

/// Operations understood by the keyed state service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyedOp<K, V> {
    Set(K, V),
    Get(K),
    Len,
}

/// Replies produced by the keyed state service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyedReply<V> {
    /// The value now stored under the key.
    Stored(V),
    Value(Option<V>),
    Len(usize),
}

struct KeyedState<K, V> {
    entries: HashMap<K, V>,
}

impl<K, V> RequestHandler for KeyedState<K, V>
where
    K: Eq + Hash + Send + 'static,
    V: Clone + Send + 'static,
{
    type Request = KeyedOp<K, V>;
    type Reply = KeyedReply<V>;

    fn handle(&mut self, op: KeyedOp<K, V>) -> KeyedReply<V> {
        match op {
            KeyedOp::Set(key, value) => {
                self.entries.insert(key, value.clone());
                KeyedReply::Stored(value)
            }
            KeyedOp::Get(key) => KeyedReply::Value(self.entries.get(&key).cloned()),
            KeyedOp::Len => KeyedReply::Len(self.entries.len()),
        }
    }
}

/// Map whose entries are only reachable through requests to a dedicated service task.
pub struct KeyedStateService<K, V> {
    handle: ServiceHandle<KeyedOp<K, V>, KeyedReply<V>>,
}

impl<K, V> KeyedStateService<K, V>
where
    K: Eq + Hash + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Spawns an empty keyed state service.
    pub fn spawn(config: ServiceConfig) -> Self {
        let state = KeyedState {
            entries: HashMap::new(),
        };

        Self {
            handle: service::spawn("keyed_state", state, config),
        }
    }

    /// Stores `value` under `key`, replacing any previous value, and returns the stored value.
    pub async fn set(&self, key: K, value: V) -> ConduitResult<V> {
        match self.handle.request(KeyedOp::Set(key, value)).await? {
            KeyedReply::Stored(value) => Ok(value),
            other => Err(unexpected_reply(&other)),
        }
    }

    /// Returns the value stored under `key`.
    pub async fn get(&self, key: K) -> ConduitResult<Option<V>> {
        match self.handle.request(KeyedOp::Get(key)).await? {
            KeyedReply::Value(value) => Ok(value),
            other => Err(unexpected_reply(&other)),
        }
    }

    /// Returns the number of stored entries.
    pub async fn len(&self) -> ConduitResult<usize> {
        match self.handle.request(KeyedOp::Len).await? {
            KeyedReply::Len(len) => Ok(len),
            other => Err(unexpected_reply(&other)),
        }
    }

    /// Returns `true` if nothing is stored.
    pub async fn is_empty(&self) -> ConduitResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Stops the underlying service. See [`ServiceHandle::stop`].
    pub async fn stop(&self) {
        self.handle.stop().await
    }
}

fn unexpected_reply<V>(reply: &KeyedReply<V>) -> ConduitError {
    let variant = match reply {
        KeyedReply::Stored(_) => "Stored",
        KeyedReply::Value(_) => "Value",
        KeyedReply::Len(_) => "Len",
    };

    conduit_error!(
        ErrorKind::InvalidState,
        "Keyed state service replied with an unexpected variant",
        variant
    )
}

impl<K, V> Clone for KeyedStateService<K, V> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
        }
    }
}

impl<K, V> fmt::Debug for KeyedStateService<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedStateService")
            .field("handle", &self.handle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get() {
        let state = KeyedStateService::<String, i32>::spawn(ServiceConfig::default());

        assert!(state.is_empty().await.unwrap());
        assert_eq!(state.set("a".into(), 1).await.unwrap(), 1);
        assert_eq!(state.set("a".into(), 2).await.unwrap(), 2);
        assert_eq!(state.set("b".into(), 3).await.unwrap(), 3);

        assert_eq!(state.get("a".into()).await.unwrap(), Some(2));
        assert_eq!(state.get("missing".into()).await.unwrap(), None);
        assert_eq!(state.len().await.unwrap(), 2);

        state.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_each_land_once() {
        let state = KeyedStateService::<u32, u32>::spawn(ServiceConfig::default());

        let mut tasks = Vec::new();
        for writer in 0..4u32 {
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..25 {
                    let key = writer * 100 + i;
                    state.set(key, key * 2).await.unwrap();
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(state.len().await.unwrap(), 100);
        assert_eq!(state.get(307).await.unwrap(), Some(614));

        state.stop().await;
    }
}
