use concord_types::{AgentId, ConcordError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::channel::{Channel, ChannelConfig, ChannelState};

/// Unordered agent pair, stored with the smaller id first.
type PairKey = (AgentId, AgentId);

fn pair_key(a: &AgentId, b: &AgentId) -> PairKey {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Summary of a registered channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub local: AgentId,
    pub remote: AgentId,
    pub state: ChannelState,
}

/// Registry holding at most one channel per agent pair.
///
/// `(a, b)` and `(b, a)` address the same channel. One instance per hub.
#[derive(Default)]
pub struct ChannelManager {
    channels: RwLock<HashMap<PairKey, Arc<Channel>>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_read(&self) -> RwLockReadGuard<'_, HashMap<PairKey, Arc<Channel>>> {
        self.channels.read().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_write(&self) -> RwLockWriteGuard<'_, HashMap<PairKey, Arc<Channel>>> {
        self.channels.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the channel for this pair, creating it if absent.
    ///
    /// Creation happens under the write lock, so concurrent callers for the
    /// same pair all receive the same channel.
    pub fn get_or_create_channel(&self, local: &AgentId, remote: &AgentId) -> Arc<Channel> {
        let key = pair_key(local, remote);
        if let Some(channel) = self.lock_read().get(&key) {
            return Arc::clone(channel);
        }

        let mut channels = self.lock_write();
        let channel = channels.entry(key).or_insert_with(|| {
            let channel = Channel::new(ChannelConfig {
                local: local.clone(),
                remote: remote.clone(),
            });
            debug!(channel = %channel.id(), %local, %remote, "created channel");
            Arc::new(channel)
        });
        Arc::clone(channel)
    }

    pub fn get_channel(&self, a: &AgentId, b: &AgentId) -> Option<Arc<Channel>> {
        self.lock_read().get(&pair_key(a, b)).cloned()
    }

    /// All registered channels, ordered by id.
    pub fn list_channels(&self) -> Vec<ChannelInfo> {
        let mut infos: Vec<ChannelInfo> = self
            .lock_read()
            .values()
            .map(|c| ChannelInfo {
                id: c.id().to_string(),
                local: c.local().clone(),
                remote: c.remote().clone(),
                state: c.state(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Drop a channel from the registry. Holders of the `Arc` keep a usable
    /// channel; later lookups for the pair create a fresh one.
    pub fn remove_channel(&self, channel_id: &str) -> Result<Arc<Channel>> {
        let mut channels = self.lock_write();
        let key = channels
            .iter()
            .find(|(_, c)| c.id() == channel_id)
            .map(|(k, _)| k.clone())
            .ok_or_else(|| ConcordError::NotFound(format!("channel {channel_id}")))?;
        let removed = channels
            .remove(&key)
            .ok_or_else(|| ConcordError::NotFound(format!("channel {channel_id}")))?;
        debug!(channel = %channel_id, "removed channel");
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.lock_read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn get_or_create_is_idempotent() {
        let mgr = ChannelManager::new();
        let alice: AgentId = "alice".into();
        let bob: AgentId = "bob".into();

        let c1 = mgr.get_or_create_channel(&alice, &bob);
        let c2 = mgr.get_or_create_channel(&alice, &bob);
        let c3 = mgr.get_or_create_channel(&bob, &alice);
        assert_eq!(c1.id(), c2.id());
        assert_eq!(c1.id(), c3.id());
        assert_eq!(mgr.len(), 1);
        assert_eq!(c3.local(), &alice, "first creator's view is kept");
    }

    #[test]
    fn concurrent_callers_share_one_channel() {
        let mgr = ChannelManager::new();
        let alice: AgentId = "alice".into();
        let bob: AgentId = "bob".into();

        let ids: HashSet<String> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..32)
                .map(|i| {
                    let (mgr, alice, bob) = (&mgr, &alice, &bob);
                    s.spawn(move || {
                        let ch = if i % 2 == 0 {
                            mgr.get_or_create_channel(alice, bob)
                        } else {
                            mgr.get_or_create_channel(bob, alice)
                        };
                        ch.id().to_string()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(ids.len(), 1);
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn distinct_pairs_get_distinct_channels() {
        let mgr = ChannelManager::new();
        let a = mgr.get_or_create_channel(&"alice".into(), &"bob".into());
        let b = mgr.get_or_create_channel(&"alice".into(), &"carol".into());
        assert_ne!(a.id(), b.id());

        let listed = mgr.list_channels();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].id < listed[1].id);
        assert!(listed.iter().all(|c| c.state == ChannelState::New));
    }

    #[test]
    fn list_reflects_established_state() {
        let mgr = ChannelManager::new();
        let ch = mgr.get_or_create_channel(&"alice".into(), &"bob".into());
        let peer = Channel::new(ChannelConfig {
            local: "bob".into(),
            remote: "alice".into(),
        });
        ch.set_remote_public_key(&peer.local_public_key()).unwrap();
        assert_eq!(mgr.list_channels()[0].state, ChannelState::Established);
    }

    #[test]
    fn remove_channel() {
        let mgr = ChannelManager::new();
        let alice: AgentId = "alice".into();
        let bob: AgentId = "bob".into();
        let ch = mgr.get_or_create_channel(&alice, &bob);

        let removed = mgr.remove_channel(ch.id()).unwrap();
        assert_eq!(removed.id(), ch.id());
        assert!(mgr.is_empty());
        assert!(mgr.get_channel(&alice, &bob).is_none());
        assert!(matches!(
            mgr.remove_channel(ch.id()),
            Err(ConcordError::NotFound(_))
        ));

        let fresh = mgr.get_or_create_channel(&alice, &bob);
        assert_ne!(fresh.id(), ch.id());
    }
}
