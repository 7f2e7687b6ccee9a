//! Device data types
//!
//! Readings, slot inventory, snapshots and the events published by the
//! device manager.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state_machine::{ConnectionState, TransitionRecord};
use crate::protocols::profinet::blocks::ModuleDiffBlock;
use crate::protocols::profinet::cyclic::CyclicStats;
use crate::protocols::profinet::resilience::StrategyKind;

// ============================================================================
// Quality
// ============================================================================

/// Quality code attached to every reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Quality {
    Good,
    Uncertain,
    Bad,
    Simulated,
}

impl Quality {
    /// Wire code carried after each input value
    pub const fn code(self) -> u8 {
        match self {
            Quality::Good => 0x00,
            Quality::Uncertain => 0x40,
            Quality::Bad => 0x80,
            Quality::Simulated => 0x41,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Quality::Good),
            0x40 => Some(Quality::Uncertain),
            0x80 => Some(Quality::Bad),
            0x41 => Some(Quality::Simulated),
            _ => None,
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Quality::Good => write!(f, "GOOD"),
            Quality::Uncertain => write!(f, "UNCERTAIN"),
            Quality::Bad => write!(f, "BAD"),
            Quality::Simulated => write!(f, "SIMULATED"),
        }
    }
}

// ============================================================================
// Reading
// ============================================================================

/// One decoded slot value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub slot: u16,
    pub value: f64,
    pub quality: Quality,
    pub timestamp: DateTime<Utc>,
    /// Strictly increasing per slot for the lifetime of the device entry
    pub sequence: u64,
}

// ============================================================================
// Slot inventory
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// Not yet reported by the device
    Unknown,
    Ok,
    Wrong,
    Missing,
}

/// Expected versus discovered module for one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInventory {
    pub slot: u16,
    pub expected_module: u32,
    pub expected_submodule: u32,
    pub discovered_module: Option<u32>,
    pub state: SlotState,
}

/// Merge a ModuleDiffBlock into the inventory
///
/// Slots absent from the diff are as expected; listed slots are wrong or
/// missing depending on the module and submodule state.
pub fn apply_module_diff(inventory: &mut [SlotInventory], diff: Option<&ModuleDiffBlock>) {
    for entry in inventory.iter_mut() {
        entry.state = SlotState::Ok;
        entry.discovered_module = Some(entry.expected_module);
    }
    let Some(diff) = diff else {
        return;
    };
    for module in diff.apis.iter().flat_map(|a| a.modules.iter()) {
        let Some(entry) = inventory.iter_mut().find(|e| e.slot == module.slot) else {
            continue;
        };
        let submodule_missing = module.submodules.iter().any(|s| s.ident_info() == 3);
        let submodule_wrong = module.submodules.iter().any(|s| s.ident_info() == 2);
        (entry.state, entry.discovered_module) = match module.state {
            0 => (SlotState::Missing, None),
            1 => (SlotState::Wrong, Some(module.ident)),
            _ if submodule_missing => (SlotState::Missing, Some(module.ident)),
            _ if submodule_wrong => (SlotState::Wrong, Some(module.ident)),
            _ => (SlotState::Ok, Some(module.ident)),
        };
    }
}

// ============================================================================
// Snapshot and events
// ============================================================================

/// Negotiated session parameters exposed for inspection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub ar_uuid: uuid::Uuid,
    pub input_frame_id: u16,
    pub output_frame_id: u16,
    pub cycle_time_ms: u64,
    pub strategy: StrategyKind,
    pub connected_at: DateTime<Utc>,
}

/// Read-only copy of one device entry
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub station_name: String,
    pub ip: Ipv4Addr,
    pub mac: Option<String>,
    pub vendor_id: u16,
    pub device_id: u16,
    pub state: ConnectionState,
    pub last_error: Option<String>,
    pub last_change: DateTime<Utc>,
    pub last_transition: Option<TransitionRecord>,
    pub history: Vec<TransitionRecord>,
    pub inventory: Vec<SlotInventory>,
    pub session: Option<SessionInfo>,
    pub stats: Option<CyclicStats>,
    pub readings: BTreeMap<u16, Reading>,
}

/// Published on the manager's broadcast channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    StateChanged(TransitionRecord),
    Reading { station: String, reading: Reading },
}

/// Value command for one output slot, applied on the next outgoing cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputCommand {
    pub slot: u16,
    pub value: f32,
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::protocols::profinet::blocks::{ModuleDiff, ModuleDiffApi, SubmoduleDiff};

    fn inventory() -> Vec<SlotInventory> {
        (1..=3)
            .map(|slot| SlotInventory {
                slot,
                expected_module: 0x10,
                expected_submodule: 0x11,
                discovered_module: None,
                state: SlotState::Unknown,
            })
            .collect()
    }

    #[test]
    fn test_quality_codes() {
        for q in [Quality::Good, Quality::Uncertain, Quality::Bad, Quality::Simulated] {
            assert_eq!(Quality::from_code(q.code()), Some(q));
        }
        assert_eq!(Quality::from_code(0x13), None);
    }

    #[test]
    fn test_module_diff_merge() {
        let mut inv = inventory();
        let diff = ModuleDiffBlock {
            apis: vec![ModuleDiffApi {
                api: 0,
                modules: vec![
                    ModuleDiff {
                        slot: 2,
                        ident: 0x10,
                        state: 0,
                        submodules: vec![],
                    },
                    ModuleDiff {
                        slot: 3,
                        ident: 0x10,
                        state: 2,
                        submodules: vec![SubmoduleDiff {
                            subslot: 1,
                            ident: 0x99,
                            state: 2 << 11,
                        }],
                    },
                ],
            }],
        };
        apply_module_diff(&mut inv, Some(&diff));
        assert_eq!(inv[0].state, SlotState::Ok);
        assert_eq!(inv[1].state, SlotState::Missing);
        assert_eq!(inv[1].discovered_module, None);
        assert_eq!(inv[2].state, SlotState::Wrong);

        apply_module_diff(&mut inv, None);
        assert!(inv.iter().all(|e| e.state == SlotState::Ok));
    }
}
