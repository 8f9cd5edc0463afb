//! infracon: async job orchestration and resource action filtering for an
//! infrastructure management console.

pub mod actions;
pub mod chain;
pub mod client;
pub mod config;
pub mod console;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod registry;
pub mod resource;
pub mod workflows;

pub use actions::{Action, ActionSet, FilterContext, actions_for, actions_for_raw, ensure_permitted};
pub use chain::{Chain, ChainContext, ChainEvent, ChainReport, ChainRunner, Step, StepOutcome};
pub use client::HttpOrchestrator;
pub use config::ConsoleConfig;
pub use console::Console;
pub use error::{ActionError, ChainError, ConsoleError, Result};
pub use job::{JobHandle, JobPoller, JobStatus};
pub use orchestrator::{JobId, JobResultResponse, Orchestrator, Params};
pub use registry::{ProviderKind, ProviderRegistry, ProviderSnapshot};
pub use resource::{ResourceKind, ResourceState};
