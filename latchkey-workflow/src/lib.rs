//! Latchkey Workflow - In-Process Coordination Primitives
//!
//! Delayed tasks and their registry, lease-backed key locks, a bounded
//! retry executor, named serial task queues and a deadline wrapper.
//! Everything here runs on the ambient Tokio runtime.

pub mod delayed_task;
pub mod key_locker;
pub mod registry;
pub mod retry;
pub mod serial_queue;
pub mod timeout;

pub use delayed_task::{
    DelayedTask, DelayedTaskOptions, RescheduleOptions, TaskCallback, TaskState,
};
pub use key_locker::{KeyLocker, LockGuard, LockStatus, LockTable};
pub use registry::{DelayedTaskRegistry, TaskRegistry};
pub use retry::{RetryExecutor, RetryHooks};
pub use serial_queue::{QueueTicket, SerialTaskQueue};
pub use timeout::run_with_timeout;
