//! Recurring daily scheduling.
//!
//! [`ScheduleSpec`] does the wall-clock arithmetic; [`RecurringScheduler`]
//! owns the single armed wake-up and turns fires into task starts.
//! [`ScheduleStore`] keeps the armed schedule across process restarts.

pub mod record;
pub mod recurring;
pub mod schedule;

pub use record::{ScheduleRecord, ScheduleStore};
pub use recurring::{AlarmPayload, FireReport, RecurringScheduler, SchedulerEvent};
pub use schedule::ScheduleSpec;
