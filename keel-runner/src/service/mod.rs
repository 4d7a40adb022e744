//! Service layer
//!
//! Services contain the orchestration logic of the runner. They compose the
//! repositories to drive one pipeline-step invocation from trigger to terminal
//! status:
//! - `SyncExecutor`: sync, poll, report, stream pod logs
//! - `PreparationJobExecutor`: run a manifest-preparation job, then sync
//! - `PromoteExecutor`: promote or abort a progressive rollout
//! - `TriggerHandler`: routes inbound triggers to the executors
//!
//! Every collaborator is injected as a narrow trait object.

mod log_streamer;
mod poller;
mod prepare;
mod promote;
mod session;
mod sync;
mod trigger;

pub use poller::OperationPoller;
pub use prepare::{PrepareSettings, PreparationJobExecutor};
pub use promote::PromoteExecutor;
pub use session::ToolSessions;
pub use sync::SyncExecutor;
pub use trigger::TriggerHandler;
