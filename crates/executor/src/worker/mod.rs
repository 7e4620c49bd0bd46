//! Bounded worker pool primitive
//!
//! This module provides:
//! - [`WorkerPool`] - capacity-bounded pool of OS worker threads
//! - [`WorkerPoolOptions`] - capacity, idle expiry and submission policy
//! - [`SubmitError`] - the pool's native submission failures
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                            │
//! │                                                              │
//! │  submit() ──► capacity check ──► queue ──► idle worker      │
//! │                  │        │                  or new worker   │
//! │          (non-blocking)  (blocking)                          │
//! │            Full error     park until a slot frees            │
//! │                                                              │
//! │  [worker 1] [worker 2] ... [worker N]    N <= capacity       │
//! │   idle workers exit after `expiry` without work              │
//! │                                                              │
//! │  release() ──► close, drain queued + running, join workers   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The pool knows nothing about names beyond thread naming and logging;
//! routing, panic reporting and release timeouts live in
//! [`crate::pool::ManagedPool`].

mod pool;

pub use pool::{Rejected, SubmitError, Task, WorkerPool, WorkerPoolOptions};
