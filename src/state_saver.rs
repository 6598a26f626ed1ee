// src/state_saver.rs
//! Best-effort snapshots of model state.
//!
//! Any `Serialize` value can be saved to JSON bytes and restored later, e.g.
//! to roll a model back between replications. Graphs that serde cannot
//! express (cycles, shared ownership, closures) are not supported.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateSaverError {
    #[error("Failed to save state: {0}")]
    Save(#[source] serde_json::Error),
    #[error("Failed to restore state: {0}")]
    Restore(#[source] serde_json::Error),
}

pub fn save_state<S: Serialize>(state: &S) -> Result<Vec<u8>, StateSaverError> {
    serde_json::to_vec(state).map_err(StateSaverError::Save)
}

pub fn restore_state<S: DeserializeOwned>(bytes: &[u8]) -> Result<S, StateSaverError> {
    serde_json::from_slice(bytes).map_err(StateSaverError::Restore)
}

/// Restores `bytes` into `target`, leaving it untouched on failure.
pub fn restore_into<S: DeserializeOwned>(target: &mut S, bytes: &[u8]) -> Result<(), StateSaverError> {
    *target = restore_state(bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counters {
        served: u64,
        waiting: BTreeMap<String, f64>,
    }

    #[test]
    fn test_round_trip() {
        let mut state = Counters {
            served: 12,
            waiting: BTreeMap::from([("desk".to_string(), 1.5)]),
        };
        let saved = save_state(&state).unwrap();
        state.served = 99;
        restore_into(&mut state, &saved).unwrap();
        assert_eq!(state.served, 12);
        assert_eq!(state.waiting["desk"], 1.5);
    }

    #[test]
    fn test_restore_failure_leaves_target() {
        let mut state = Counters {
            served: 3,
            waiting: BTreeMap::new(),
        };
        let err = restore_into(&mut state, b"{\"served\": \"many\"}").unwrap_err();
        assert!(matches!(err, StateSaverError::Restore(_)));
        assert_eq!(state.served, 3);
    }

    #[test]
    fn test_unserializable_state_fails() {
        // JSON object keys must be strings.
        let map = BTreeMap::from([((1, 2), "pair")]);
        assert!(matches!(save_state(&map), Err(StateSaverError::Save(_))));
    }
}
