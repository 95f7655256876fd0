//! Session execution orchestration.
//!
//! Drives the full session lifecycle: config resolution, cache restore,
//! VM launch, environment/workspace bridging, the prepare/run phases,
//! copyback, and the background-task drain at shutdown.

mod engine;

pub use engine::{HostContext, SessionOrchestrator};
