//! bgrunner: background task lifecycle coordination.
//!
//! Lets an application register a unit of work that runs daily at a
//! wall-clock time or on demand, shows a persistent status indicator while
//! it runs, and survives process restarts.
//!
//! # Architecture
//!
//! - **Option store** (`store`): single-slot, file-backed task configuration
//! - **Presenter** (`presenter`): the one persistent status indicator
//! - **Event queue** (`events`): parks execute events until a consumer attaches
//! - **Runner** (`runner`): `Idle -> Starting -> Running -> Stopping` state machine
//! - **Scheduler** (`scheduler`): daily wake-up that re-arms after every fire
//! - **Recovery** (`recovery`): relaunches an in-flight task after restart
//!
//! OS facilities are injected through the traits in [`platform`];
//! [`BackgroundRunner`] wires everything together.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod options;
pub mod permissions;
pub mod platform;
pub mod presenter;
pub mod recovery;
pub mod runner;
pub mod runner_dirs;
pub mod scheduler;
pub mod store;
pub mod testing;

pub use config::RunnerConfig;
pub use coordinator::BackgroundRunner;
pub use error::{Result, RunnerError};
pub use events::{ChannelConsumer, EventQueue, ExecuteConsumer};
pub use options::{ExecuteEvent, StatusUpdate, TaskIcon, TaskOptions};
pub use recovery::RestartSignal;
pub use runner::{RunnerState, StartOutcome, StopOutcome, Trigger, UpdateOutcome};
pub use scheduler::{AlarmPayload, ScheduleSpec, ScheduleStore, SchedulerEvent};
pub use store::OptionStore;
