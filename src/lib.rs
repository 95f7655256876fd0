pub mod bridge;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod launcher;
pub mod orchestrator;
pub mod poll;
pub mod runner;
pub mod session;
pub mod sync;
pub mod tasks;

pub use bridge::{EnvBridge, GuestTransport, SessionBridge};
pub use cache::{ArtifactCache, CacheEntry, CacheTransport};
pub use config::{ConfigResolver, RunnerConfig, SessionInputs, SyncStrategy};
pub use error::{Result, SessionError};
pub use orchestrator::{HostContext, SessionOrchestrator};
pub use runner::{CommandPhase, CommandRunner};
pub use session::SessionDescriptor;
pub use sync::WorkspaceSync;
pub use tasks::BackgroundTaskCoordinator;
