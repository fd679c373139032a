//! Background reminder dispatch.

pub mod runner;

pub use runner::{ReminderScheduler, SchedulerConfig, SchedulerHandle, TickReport};
