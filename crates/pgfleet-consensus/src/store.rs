//! The `ConsensusStore` capability set: everything every
//! other component needs from the underlying strongly-consistent key-value
//! store, and nothing else. No component in this workspace talks to a real
//! consensus protocol directly; they all go through this trait.

use std::future::Future;

use bytes::Bytes;

use crate::error::ConsensusResult;
use crate::watch::WatchStream;

/// Opaque lease handle granted by `GrantLease`. Revoked or expired leases are
/// addressed by this same value; the store decides validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(pub u64);

/// The revision a key was found or written at, paired with its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    pub value: Bytes,
    pub revision: u64,
}

/// The expected-revision precondition for a compare-and-swap. `Absent` means
/// the CAS only succeeds if the key does not currently exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    Revision(u64),
    Absent,
}

/// A single change observed by a `Watch`, delivered at-least-once and in
/// revision order by every implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub key: String,
    pub revision: u64,
    pub kind: WatchEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEventKind {
    Put(Bytes),
    Delete,
}

/// Abstraction over a strongly-consistent key-value store providing atomic
/// compare-and-swap, time-bounded leases, key watches, and a monotonic
/// cluster clock. Implementations must guarantee linearizable
/// writes, serializable reads, at-least-once watch delivery in revision
/// order, and bounded lease skew.
///
/// This crate's components are generic over `C: ConsensusStore` rather than
/// boxing it as `dyn`: every method below is `async fn`, and keeping the
/// trait free of `dyn`-compatibility constraints lets implementations return
/// concrete futures without an extra heap allocation per call.
pub trait ConsensusStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> impl Future<Output = ConsensusResult<Option<VersionedValue>>> + Send;

    fn put(&self, key: &str, value: Bytes, lease: Option<LeaseId>) -> impl Future<Output = ConsensusResult<u64>> + Send;

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Precondition,
        value: Bytes,
        lease: Option<LeaseId>,
    ) -> impl Future<Output = ConsensusResult<u64>> + Send;

    fn delete(&self, key: &str, expected_revision: Option<u64>) -> impl Future<Output = ConsensusResult<()>> + Send;

    /// Opens a restartable watch over every key with the given prefix,
    /// starting at (and including) `from_revision`.
    fn watch(&self, key_prefix: &str, from_revision: u64) -> impl Future<Output = ConsensusResult<WatchStream>> + Send;

    /// Lists every key currently live under `key_prefix`: present and, if
    /// leased, not past its lease's expiry. Unlike replaying a `watch`'s
    /// backlog, this never returns a key whose lease has lapsed, even if
    /// the store has not yet gotten around to garbage-collecting it —
    /// callers that need "what is true right now" (as opposed to "what has
    /// ever been written") must use this instead of `watch`.
    fn scan_live(&self, key_prefix: &str) -> impl Future<Output = ConsensusResult<Vec<(String, VersionedValue)>>> + Send;

    fn grant_lease(&self, ttl: std::time::Duration) -> impl Future<Output = ConsensusResult<LeaseId>> + Send;

    /// Renews a lease, returning its new deadline as a logical revision.
    fn keep_alive(&self, lease: LeaseId) -> impl Future<Output = ConsensusResult<u64>> + Send;

    fn revoke_lease(&self, lease: LeaseId) -> impl Future<Output = ConsensusResult<()>> + Send;

    /// The store's current logical revision. Opaque but monotonic across the
    /// cluster; used as the basis for `Epoch` and `SnapshotVersion`.
    fn now(&self) -> impl Future<Output = u64> + Send;
}
