//! The classification rules, evaluated in order.

use pgfleet_types::{HealthReport, Role};

use crate::probe::ProbeObservation;

#[derive(Debug, Clone, Copy)]
pub struct LagThresholds {
    pub bytes: u64,
    pub seconds: u64,
}

/// Classifies a probe outcome. `observation` is `None` when the probe failed
/// to connect or exceeded `T_timeout`; both map to `Unreachable`.
pub fn classify(observation: Option<ProbeObservation>, thresholds: LagThresholds) -> Role {
    let Some(observation) = observation else {
        return Role::Unreachable;
    };
    if observation.writable {
        return Role::Primary;
    }
    if observation.in_recovery {
        return HealthReport::classify_standby(
            observation.lag_bytes,
            observation.lag_seconds,
            thresholds.bytes,
            thresholds.seconds,
        );
    }
    Role::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const THRESHOLDS: LagThresholds = LagThresholds {
        bytes: 16 * 1024 * 1024,
        seconds: 5,
    };

    #[test]
    fn unreachable_probe_classifies_unreachable() {
        assert_eq!(classify(None, THRESHOLDS), Role::Unreachable);
    }

    #[test_case(true, false, 0, 0, Role::Primary; "writable is always primary")]
    #[test_case(false, true, 1024, 1, Role::StandbyInSync; "small lag is in sync")]
    #[test_case(false, true, 64 * 1024 * 1024, 1, Role::StandbyLagging; "large byte lag is lagging")]
    #[test_case(false, true, 0, 30, Role::StandbyLagging; "large time lag is lagging")]
    #[test_case(false, false, 0, 0, Role::Unknown; "neither writable nor recovering is unknown")]
    fn classification_rules(writable: bool, in_recovery: bool, lag_bytes: u64, lag_seconds: u64, expected: Role) {
        let observation = ProbeObservation {
            writable,
            in_recovery,
            lag_bytes,
            lag_seconds,
            wal_position: 0,
        };
        assert_eq!(classify(Some(observation), THRESHOLDS), expected);
    }

    #[test]
    fn writable_wins_even_if_also_marked_recovering() {
        let observation = ProbeObservation {
            writable: true,
            in_recovery: true,
            lag_bytes: 999_999_999,
            lag_seconds: 999,
            wal_position: 0,
        };
        assert_eq!(classify(Some(observation), THRESHOLDS), Role::Primary);
    }
}
