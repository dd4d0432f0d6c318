//! Bit-exact consensus-store key layout and value encoding.
//!
//! Every path here is load-bearing: other components assemble and parse
//! these exact strings/byte layouts, so a change here is a wire-format
//! change for the whole cluster.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use pgfleet_types::{Epoch, GroupId, NodeId, Role, UnixNanos};

pub fn cluster_id_key() -> String {
    "/cluster/id".to_string()
}

pub fn member_key(group: &GroupId, node: &NodeId) -> String {
    format!("/group/{group}/members/{node}")
}

pub fn lease_key(group: &GroupId) -> String {
    format!("/group/{group}/lease")
}

pub fn election_key(group: &GroupId, node: &NodeId) -> String {
    format!("/group/{group}/election/{node}")
}

pub fn election_prefix(group: &GroupId) -> String {
    format!("/group/{group}/election/")
}

pub fn health_key(group: &GroupId, node: &NodeId) -> String {
    format!("/health/{group}/{node}")
}

pub fn health_prefix(group: &GroupId) -> String {
    format!("/health/{group}/")
}

/// Broad recompute-trigger prefix covering every group's lease, election,
/// and membership keys. Not a prefix any single value is encoded against;
/// subscribers (the Topology Broadcaster) use it to learn that *something*
/// under `/group/` changed and recompute its snapshot from scratch, then
/// discard events whose trailing segment isn't `lease`.
pub fn lease_prefix() -> String {
    "/group/".to_string()
}

pub fn health_root_prefix() -> String {
    "/health/".to_string()
}

pub fn topology_current_key() -> String {
    "/topology/current".to_string()
}

/// Decoded form of the `/group/<G>/lease` value:
/// `<NodeID> \x00 <Epoch as big-endian uint64> \x00 <ExpiresAt as unix-nanos big-endian int64>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseValue {
    pub node_id: NodeId,
    pub epoch: Epoch,
    pub expires_at: UnixNanos,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyCodecError {
    #[error("malformed lease value: missing NUL separator")]
    LeaseMissingSeparator,
    #[error("malformed lease value: short epoch/expiry field")]
    LeaseShortField,
    #[error("malformed health value: expected 25 bytes, got {0}")]
    HealthWrongLength(usize),
    #[error("malformed health value: unknown role code {0:#04x}")]
    HealthUnknownRole(u8),
    #[error("malformed election value: expected 8 bytes, got {0}")]
    ElectionWrongLength(usize),
}

impl LeaseValue {
    pub fn encode(&self) -> Bytes {
        let node_bytes = self.node_id.as_str().as_bytes();
        let mut buf = BytesMut::with_capacity(node_bytes.len() + 1 + 8 + 1 + 8);
        buf.put_slice(node_bytes);
        buf.put_u8(0);
        buf.put_u64(self.epoch.get());
        buf.put_u8(0);
        buf.put_i64(self.expires_at);
        buf.freeze()
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self, KeyCodecError> {
        let sep = bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or(KeyCodecError::LeaseMissingSeparator)?;
        let node_id = NodeId::new(String::from_utf8_lossy(&bytes[..sep]).into_owned());
        bytes.advance(sep + 1);
        if bytes.len() < 8 {
            return Err(KeyCodecError::LeaseShortField);
        }
        let epoch = Epoch::new(bytes.get_u64());
        if bytes.is_empty() || bytes.get_u8() != 0 {
            return Err(KeyCodecError::LeaseMissingSeparator);
        }
        if bytes.len() < 8 {
            return Err(KeyCodecError::LeaseShortField);
        }
        let expires_at = bytes.get_i64();
        Ok(Self {
            node_id,
            epoch,
            expires_at,
        })
    }
}

/// Decoded form of the `/health/<G>/<N>` value: a 1-byte role code followed
/// by three fixed-width big-endian integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthValue {
    pub role: Role,
    pub lag_bytes: u64,
    pub wal_position: u64,
    pub observed_at: UnixNanos,
}

const HEALTH_VALUE_LEN: usize = 1 + 8 + 8 + 8;

impl HealthValue {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEALTH_VALUE_LEN);
        buf.put_u8(self.role.wire_code());
        buf.put_u64(self.lag_bytes);
        buf.put_u64(self.wal_position);
        buf.put_i64(self.observed_at);
        buf.freeze()
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self, KeyCodecError> {
        if bytes.len() != HEALTH_VALUE_LEN {
            return Err(KeyCodecError::HealthWrongLength(bytes.len()));
        }
        let code = bytes.get_u8();
        let role = Role::from_wire_code(code).ok_or(KeyCodecError::HealthUnknownRole(code))?;
        let lag_bytes = bytes.get_u64();
        let wal_position = bytes.get_u64();
        let observed_at = bytes.get_i64();
        Ok(Self {
            role,
            lag_bytes,
            wal_position,
            observed_at,
        })
    }
}

/// The `/group/<G>/election/<N>` value: a raw big-endian WAL position.
pub fn encode_election_value(wal_position: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u64(wal_position);
    buf.freeze()
}

pub fn decode_election_value(mut bytes: &[u8]) -> Result<u64, KeyCodecError> {
    if bytes.len() != 8 {
        return Err(KeyCodecError::ElectionWrongLength(bytes.len()));
    }
    Ok(bytes.get_u64())
}

/// Extracts the trailing path segment (the node or group id) from a key
/// produced by the builders above, e.g. `/health/g1/n2` -> `n2`.
pub fn last_segment(key: &str) -> Option<&str> {
    key.rsplit('/').next().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgfleet_types::Epoch;

    #[test]
    fn key_builders_match_spec_layout() {
        let g = GroupId::new("g1");
        let n = NodeId::new("n1");
        assert_eq!(lease_key(&g), "/group/g1/lease");
        assert_eq!(election_key(&g, &n), "/group/g1/election/n1");
        assert_eq!(health_key(&g, &n), "/health/g1/n1");
        assert_eq!(member_key(&g, &n), "/group/g1/members/n1");
        assert_eq!(topology_current_key(), "/topology/current");
    }

    #[test]
    fn lease_value_round_trips() {
        let value = LeaseValue {
            node_id: NodeId::new("node-b"),
            epoch: Epoch::new(8),
            expires_at: 1_700_000_000_000_000_000,
        };
        let encoded = value.encode();
        let decoded = LeaseValue::decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn lease_value_rejects_truncated_bytes() {
        let value = LeaseValue {
            node_id: NodeId::new("a"),
            epoch: Epoch::new(1),
            expires_at: 0,
        };
        let encoded = value.encode();
        let truncated = &encoded[..encoded.len() - 4];
        assert!(LeaseValue::decode(truncated).is_err());
    }

    #[test]
    fn health_value_round_trips() {
        let value = HealthValue {
            role: Role::StandbyInSync,
            lag_bytes: 4096,
            wal_position: 123_456,
            observed_at: 42,
        };
        let encoded = value.encode();
        assert_eq!(encoded.len(), HEALTH_VALUE_LEN);
        assert_eq!(HealthValue::decode(&encoded).unwrap(), value);
    }

    #[test]
    fn health_value_rejects_unknown_role_code() {
        let mut bytes = vec![0xEE];
        bytes.extend_from_slice(&[0u8; 24]);
        assert_eq!(
            HealthValue::decode(&bytes),
            Err(KeyCodecError::HealthUnknownRole(0xEE))
        );
    }

    #[test]
    fn election_value_round_trips() {
        let encoded = encode_election_value(999);
        assert_eq!(decode_election_value(&encoded).unwrap(), 999);
    }

    #[test]
    fn last_segment_extracts_trailing_id() {
        assert_eq!(last_segment("/health/g1/n2"), Some("n2"));
        assert_eq!(last_segment("/cluster/id"), Some("id"));
        assert_eq!(last_segment(""), None);
    }
}
