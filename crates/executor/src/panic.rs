//! Task panic observation
//!
//! Pools contain every task panic. An embedding application that wants to
//! see them passes a [`PanicHandler`] to the manager; otherwise one line is
//! written to stderr.

use std::any::Any;
use std::io::Write;
use std::sync::Arc;

use tracing::error;

/// Observer for panics caught inside pool tasks
///
/// Called synchronously on the worker thread that ran the task.
pub trait PanicHandler: Send + Sync {
    /// Handle a panic raised by a task submitted to `pool`
    fn handle_panic(&self, pool: &str, payload: &(dyn Any + Send));
}

impl<F> PanicHandler for F
where
    F: Fn(&str, &(dyn Any + Send)) + Send + Sync,
{
    fn handle_panic(&self, pool: &str, payload: &(dyn Any + Send)) {
        self(pool, payload)
    }
}

/// Shared handle to a panic observer
pub type SharedPanicHandler = Arc<dyn PanicHandler>;

/// Panic observer that reports through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPanicHandler;

impl PanicHandler for TracingPanicHandler {
    fn handle_panic(&self, pool: &str, payload: &(dyn Any + Send)) {
        error!(pool = %pool, panic = %panic_message(payload), "Task panicked");
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Route a caught panic to the handler, or to stderr when there is none
pub(crate) fn report_panic(
    handler: Option<&SharedPanicHandler>,
    pool: &str,
    payload: &(dyn Any + Send),
) {
    match handler {
        Some(handler) => handler.handle_panic(pool, payload),
        None => {
            // Stderr may be closed; nothing else to do then.
            let _ = writeln!(
                std::io::stderr().lock(),
                "pool-executor: task in pool {} panicked: {}",
                pool,
                panic_message(payload)
            );
        }
    }
}
