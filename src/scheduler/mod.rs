pub mod dispatch;
pub mod job;
pub mod sched;

pub use job::{Job, JobStatus};
pub use sched::{Scheduled, Scheduler};
