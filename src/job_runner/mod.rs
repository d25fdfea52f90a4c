//! Parallel execution of per-FOV jobs (image save, QC metrics computation).

mod job;
mod pool;

pub use job::{Job, JobKind, JobPayload, JobResult};
pub use pool::JobRunner;
