//! # Device Management Module
//!
//! ```text
//! DeviceManager
//!   ├── DeviceEntry (one per station name)
//!   │     ├── StateMachine (OFFLINE/CONNECTING/DISCOVERY/RUNNING/ERROR)
//!   │     ├── slot inventory, latest readings
//!   │     └── session task (establish -> cyclic exchange)
//!   └── CONNECTING slot (at most one station)
//! ```

pub mod device_manager;
pub mod state_machine;
pub mod types;

pub use device_manager::DeviceManager;
pub use state_machine::{
    ConnectionState, StateMachine, TransitionHook, TransitionRecord, Trigger, TRANSITIONS,
};
pub use types::{
    DeviceEvent, DeviceSnapshot, OutputCommand, Quality, Reading, SessionInfo, SlotInventory,
    SlotState,
};
