//! Turns a caught `panic::catch_unwind` payload into a loggable string.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Extracts a human-readable message from a panic payload, the same way
/// a caught user-handler or worker-thread panic is logged rather than
/// allowed to propagate and bring the process down.
pub fn stringify_panic(payload: Box<dyn Any + Send>) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		message.to_string()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"unknown panic payload".to_owned()
	}
}

/// Runs a user-supplied callback (`on_start`, `on_reload`,
/// `on_child_start`, `on_child_exit`), catching and logging a panic
/// instead of letting it unwind into the supervisor's own control flow.
pub fn call_guarded(target: &str, hook: &str, f: impl FnOnce()) {
	if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
		let message = stringify_panic(payload);
		tracing::error!(target, hook, %message, "user callback panicked");
	}
}
