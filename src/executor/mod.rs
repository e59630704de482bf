//! Task Executor Module
//!
//! A priority-scheduled worker pool with at-most-once execution per task.
//!
//! ## Architecture Overview
//! The executor follows a **Pull-based** model with **Lease** management:
//! 1. **Submission**: Tasks go to the `TaskDispatcher`, which records them as `Pending`
//!    in the `ResultStore` and pushes them onto a `(priority, seq)` heap.
//! 2. **Execution**: Workers block on the heap with a bounded timeout.
//! 3. **Leasing**: Before running a task a worker must win the `task:{id}` lease.
//!    A sidecar renews it while the processor runs; if the worker dies the lease
//!    simply expires.
//! 4. **Publishing**: The winner writes the single `TaskResult`; callers poll for it.
//!
//! ## Submodules
//! - **`queue`**: The dispatcher: submit, pop, wait, status and cancellation.
//! - **`executor`**: The worker pool and the claim -> run -> publish lifecycle.
//! - **`registry`**: Capability-based routing from `TaskType` to a `Processor`.
//! - **`processors`**: Feature extraction and index build processors.
//! - **`protocol`**: Payload shapes and the HTTP task contracts.

pub mod executor;
pub mod handlers;
pub mod processors;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod types;
