//! Wave scheduling of provider calls

pub mod scheduler;

pub use scheduler::{ScheduledTask, Scheduler, SchedulerConfig, SchedulerStats, TaskHandle};
