//! Table of named channels.

use std::sync::Arc;

use dashmap::DashMap;
use sockrpc_core::ChannelId;

use crate::channel::Channel;

/// Active channels keyed by identity. Anonymous channels are never stored.
#[derive(Default)]
pub struct ConnectionRegistry {
    channels: DashMap<String, Arc<Channel>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `channel` under `name`, returning whichever channel it displaced.
    pub fn insert(&self, name: &str, channel: Arc<Channel>) -> Option<Arc<Channel>> {
        self.channels.insert(name.to_owned(), channel)
    }

    /// Remove `name` only while it still maps to the channel `id`.
    pub fn remove_if_same(&self, name: &str, id: &ChannelId) -> bool {
        self.channels
            .remove_if(name, |_, ch| ch.id() == id)
            .is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Point-in-time copy of every channel, safe to iterate while others
    /// connect or disconnect.
    pub fn snapshot(&self) -> Vec<Arc<Channel>> {
        self.channels
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Registered identities, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::tests::detached_channel;

    fn channel() -> Arc<Channel> {
        Arc::new(detached_channel(4).0)
    }

    #[test]
    fn insert_and_get() {
        let reg = ConnectionRegistry::new();
        let ch = channel();
        assert!(reg.insert("alice", ch.clone()).is_none());
        assert_eq!(reg.get("alice").unwrap().id(), ch.id());
        assert!(reg.contains("alice"));
        assert_eq!(reg.len(), 1);
        assert!(reg.get("bob").is_none());
    }

    #[test]
    fn insert_same_name_returns_displaced() {
        let reg = ConnectionRegistry::new();
        let old = channel();
        let new = channel();
        let _ = reg.insert("alice", old.clone());
        let displaced = reg.insert("alice", new.clone()).unwrap();
        assert_eq!(displaced.id(), old.id());
        assert_eq!(reg.get("alice").unwrap().id(), new.id());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn remove_if_same_ignores_replaced_entry() {
        let reg = ConnectionRegistry::new();
        let old = channel();
        let new = channel();
        let _ = reg.insert("alice", old.clone());
        let _ = reg.insert("alice", new.clone());

        assert!(!reg.remove_if_same("alice", old.id()));
        assert!(reg.contains("alice"));
        assert!(reg.remove_if_same("alice", new.id()));
        assert!(reg.is_empty());
    }

    #[test]
    fn snapshot_and_names() {
        let reg = ConnectionRegistry::new();
        let _ = reg.insert("bob", channel());
        let _ = reg.insert("alice", channel());
        assert_eq!(reg.snapshot().len(), 2);
        assert_eq!(reg.names(), vec!["alice".to_owned(), "bob".to_owned()]);
    }
}
