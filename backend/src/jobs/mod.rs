// Background Jobs
//
// Interval-driven jobs spawned from main and stopped through a shared
// cancellation token.

pub mod reminder_due;

pub use reminder_due::{ReminderDueJob, ReminderScanResult};
