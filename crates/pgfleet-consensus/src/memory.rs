//! An in-process reference `ConsensusStore`, used by every test in this
//! workspace in place of a live consensus deployment. It is linearizable
//! by construction (a single `tokio::sync::Mutex` serializes
//! every operation) and delivers watch events in revision order because
//! every mutation both advances the revision counter and enqueues the event
//! under the same lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use crate::error::{ConsensusError, ConsensusResult};
use crate::store::{ConsensusStore, LeaseId, Precondition, VersionedValue, WatchEvent, WatchEventKind};
use crate::watch::WatchStream;

struct Entry {
    value: Bytes,
    revision: u64,
    lease: Option<LeaseId>,
}

struct LeaseState {
    ttl: Duration,
    deadline: Instant,
}

struct Watcher {
    prefix: String,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

struct Inner {
    revision: u64,
    entries: HashMap<String, Entry>,
    log: Vec<WatchEvent>,
    leases: HashMap<u64, LeaseState>,
    next_lease_id: u64,
    watchers: Vec<Watcher>,
}

impl Inner {
    fn lease_live(&self, lease: LeaseId) -> bool {
        self.leases
            .get(&lease.0)
            .is_some_and(|l| Instant::now() < l.deadline)
    }

    /// Reads an entry, treating it as absent if its lease has expired.
    fn live_entry(&self, key: &str) -> Option<&Entry> {
        let entry = self.entries.get(key)?;
        match entry.lease {
            Some(lease) if !self.lease_live(lease) => None,
            _ => Some(entry),
        }
    }

    fn record(&mut self, key: &str, kind: WatchEventKind) -> u64 {
        self.revision += 1;
        let revision = self.revision;
        let event = WatchEvent {
            key: key.to_string(),
            revision,
            kind,
        };
        for watcher in &self.watchers {
            if event.key.starts_with(&watcher.prefix) {
                let _ = watcher.tx.send(event.clone());
            }
        }
        self.log.push(event);
        revision
    }
}

/// In-memory `ConsensusStore`. Cheap to clone: all state lives behind an
/// `Arc<Mutex<_>>`, matching the rest of this workspace's pointer-swap and
/// shared-handle conventions rather than a singleton accessed through
/// module-level statics.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                revision: 0,
                entries: HashMap::new(),
                log: Vec::new(),
                leases: HashMap::new(),
                next_lease_id: 1,
                watchers: Vec::new(),
            })),
        }
    }
}

impl ConsensusStore for MemoryStore {
    async fn get(&self, key: &str) -> ConsensusResult<Option<VersionedValue>> {
        let inner = self.inner.lock().await;
        Ok(inner.live_entry(key).map(|e| VersionedValue {
            value: e.value.clone(),
            revision: e.revision,
        }))
    }

    async fn put(&self, key: &str, value: Bytes, lease: Option<LeaseId>) -> ConsensusResult<u64> {
        let mut inner = self.inner.lock().await;
        let revision = inner.record(key, WatchEventKind::Put(value.clone()));
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                revision,
                lease,
            },
        );
        Ok(revision)
    }

    async fn scan_live(&self, key_prefix: &str) -> ConsensusResult<Vec<(String, VersionedValue)>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .keys()
            .filter(|key| key.starts_with(key_prefix))
            .filter_map(|key| {
                inner.live_entry(key).map(|e| {
                    (
                        key.clone(),
                        VersionedValue {
                            value: e.value.clone(),
                            revision: e.revision,
                        },
                    )
                })
            })
            .collect())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Precondition,
        value: Bytes,
        lease: Option<LeaseId>,
    ) -> ConsensusResult<u64> {
        let mut inner = self.inner.lock().await;
        let current = inner.live_entry(key).map(|e| e.revision);
        let matches = match expected {
            Precondition::Absent => current.is_none(),
            Precondition::Revision(r) => current == Some(r),
        };
        if !matches {
            return Err(ConsensusError::Conflict {
                key: key.to_string(),
                expected: match expected {
                    Precondition::Absent => None,
                    Precondition::Revision(r) => Some(r),
                },
                actual: current,
            });
        }
        let revision = inner.record(key, WatchEventKind::Put(value.clone()));
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                revision,
                lease,
            },
        );
        Ok(revision)
    }

    async fn delete(&self, key: &str, expected_revision: Option<u64>) -> ConsensusResult<()> {
        let mut inner = self.inner.lock().await;
        let current = inner.live_entry(key).map(|e| e.revision);
        if let Some(expected) = expected_revision {
            if current != Some(expected) {
                return Err(ConsensusError::Conflict {
                    key: key.to_string(),
                    expected: Some(expected),
                    actual: current,
                });
            }
        } else if current.is_none() {
            return Ok(());
        }
        inner.record(key, WatchEventKind::Delete);
        inner.entries.remove(key);
        Ok(())
    }

    async fn watch(&self, key_prefix: &str, from_revision: u64) -> ConsensusResult<WatchStream> {
        let mut inner = self.inner.lock().await;
        let (tx, rx) = mpsc::unbounded_channel();
        for event in &inner.log {
            if event.revision >= from_revision && event.key.starts_with(key_prefix) {
                let _ = tx.send(event.clone());
            }
        }
        inner.watchers.push(Watcher {
            prefix: key_prefix.to_string(),
            tx,
        });
        Ok(WatchStream::new(rx))
    }

    async fn grant_lease(&self, ttl: Duration) -> ConsensusResult<LeaseId> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_lease_id;
        inner.next_lease_id += 1;
        inner.leases.insert(
            id,
            LeaseState {
                ttl,
                deadline: Instant::now() + ttl,
            },
        );
        Ok(LeaseId(id))
    }

    async fn keep_alive(&self, lease: LeaseId) -> ConsensusResult<u64> {
        let mut inner = self.inner.lock().await;
        let revision = inner.revision;
        let ttl = match inner.leases.get(&lease.0) {
            Some(state) if Instant::now() < state.deadline => state.ttl,
            _ => return Err(ConsensusError::LeaseExpired(lease.0)),
        };
        inner
            .leases
            .insert(lease.0, LeaseState {
                ttl,
                deadline: Instant::now() + ttl,
            });
        Ok(revision)
    }

    async fn revoke_lease(&self, lease: LeaseId) -> ConsensusResult<()> {
        let mut inner = self.inner.lock().await;
        inner.leases.remove(&lease.0);
        let bound_keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.lease == Some(lease))
            .map(|(key, _)| key.clone())
            .collect();
        for key in bound_keys {
            inner.entries.remove(&key);
        }
        Ok(())
    }

    async fn now(&self) -> u64 {
        self.inner.lock().await.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryStore::new();
        let rev = store.put("/a", Bytes::from_static(b"1"), None).await.unwrap();
        let got = store.get("/a").await.unwrap().unwrap();
        assert_eq!(got.revision, rev);
        assert_eq!(got.value, Bytes::from_static(b"1"));
    }

    #[tokio::test]
    async fn cas_on_absent_succeeds_once() {
        let store = MemoryStore::new();
        store
            .compare_and_swap("/lease", Precondition::Absent, Bytes::from_static(b"x"), None)
            .await
            .unwrap();
        let conflict = store
            .compare_and_swap("/lease", Precondition::Absent, Bytes::from_static(b"y"), None)
            .await;
        assert!(matches!(conflict, Err(ConsensusError::Conflict { .. })));
    }

    #[tokio::test]
    async fn cas_on_expected_revision_detects_conflict() {
        let store = MemoryStore::new();
        let rev = store.put("/a", Bytes::from_static(b"1"), None).await.unwrap();
        store
            .compare_and_swap("/a", Precondition::Revision(rev), Bytes::from_static(b"2"), None)
            .await
            .unwrap();
        let stale = store
            .compare_and_swap("/a", Precondition::Revision(rev), Bytes::from_static(b"3"), None)
            .await;
        assert!(matches!(stale, Err(ConsensusError::Conflict { .. })));
    }

    #[tokio::test]
    async fn scan_live_excludes_expired_leased_keys() {
        let store = MemoryStore::new();
        let lease = store.grant_lease(Duration::from_millis(10)).await.unwrap();
        store.put("/health/g1/a", Bytes::from_static(b"1"), Some(lease)).await.unwrap();
        store.put("/health/g1/b", Bytes::from_static(b"2"), None).await.unwrap();

        let live = store.scan_live("/health/g1/").await.unwrap();
        assert_eq!(live.len(), 2);

        tokio::time::sleep(Duration::from_millis(30)).await;

        let live = store.scan_live("/health/g1/").await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].0, "/health/g1/b");
    }

    #[tokio::test]
    async fn scan_live_ignores_unrelated_prefixes() {
        let store = MemoryStore::new();
        store.put("/health/g1/a", Bytes::from_static(b"1"), None).await.unwrap();
        store.put("/group/g1/lease", Bytes::from_static(b"x"), None).await.unwrap();

        let live = store.scan_live("/health/g1/").await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].0, "/health/g1/a");
    }

    #[tokio::test]
    async fn watch_replays_backlog_then_delivers_live_events() {
        let store = MemoryStore::new();
        store.put("/health/g1/a", Bytes::from_static(b"1"), None).await.unwrap();
        let mut stream = store.watch("/health/g1/", 0).await.unwrap();
        let replayed = stream.next().await.unwrap();
        assert_eq!(replayed.key, "/health/g1/a");

        store.put("/health/g1/b", Bytes::from_static(b"2"), None).await.unwrap();
        let live = stream.next().await.unwrap();
        assert_eq!(live.key, "/health/g1/b");
    }

    #[tokio::test]
    async fn watch_ignores_unrelated_prefixes() {
        let store = MemoryStore::new();
        let mut stream = store.watch("/health/g1/", 0).await.unwrap();
        store.put("/group/g1/lease", Bytes::from_static(b"x"), None).await.unwrap();
        store.put("/health/g1/a", Bytes::from_static(b"1"), None).await.unwrap();
        let event = stream.next().await.unwrap();
        assert_eq!(event.key, "/health/g1/a");
    }

    #[tokio::test]
    async fn keep_alive_on_unknown_lease_is_expired() {
        let store = MemoryStore::new();
        let result = store.keep_alive(LeaseId(999)).await;
        assert!(matches!(result, Err(ConsensusError::LeaseExpired(999))));
    }

    #[tokio::test]
    async fn expired_lease_makes_key_disappear() {
        let store = MemoryStore::new();
        let lease = store.grant_lease(Duration::from_millis(10)).await.unwrap();
        store.put("/health/g1/a", Bytes::from_static(b"1"), Some(lease)).await.unwrap();
        assert!(store.get("/health/g1/a").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.get("/health/g1/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoke_lease_removes_bound_keys() {
        let store = MemoryStore::new();
        let lease = store.grant_lease(Duration::from_secs(60)).await.unwrap();
        store.put("/a", Bytes::from_static(b"1"), Some(lease)).await.unwrap();
        store.revoke_lease(lease).await.unwrap();
        assert!(store.get("/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn now_advances_monotonically_with_writes() {
        let store = MemoryStore::new();
        let t0 = store.now().await;
        store.put("/a", Bytes::from_static(b"1"), None).await.unwrap();
        let t1 = store.now().await;
        assert!(t1 > t0);
    }
}
