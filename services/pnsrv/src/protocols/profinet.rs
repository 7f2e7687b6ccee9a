//! PROFINET IO controller side
//!
//! ```text
//! dcp          Identify (layer 2)          ┐
//! rpc, blocks  Connect / Control / Release ├─ codec (pure encode/decode)
//! rt           cyclic RT_CLASS_1 frames    ┘
//! resilience   strategies, rejection analysis
//! connection   establishment engine (uses all of the above)
//! cyclic       per-session exchange loop
//! ```

pub mod blocks;
pub mod codec;
pub mod connection;
pub mod constants;
pub mod cyclic;
pub mod dcp;
pub mod resilience;
pub mod rpc;
pub mod rt;

pub use connection::{establish, ConnectionTarget, EngineConfig, SessionParams};
pub use cyclic::{CycleOutcome, CyclicEngine, CyclicStats};
pub use dcp::DiscoveredDevice;
pub use resilience::{classify_status, ErrorClassification, Strategy, StrategyKind};
