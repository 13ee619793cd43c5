//! Bounded asynchronous work queue with a fixed worker pool

mod work_queue;

pub use work_queue::{JobError, JobHandle, JobProcessor, QueueError, WorkQueue};
