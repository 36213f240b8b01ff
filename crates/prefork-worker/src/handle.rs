use prefork_core::WireOptions;
use std::sync::{Arc, RwLock};

/// Handed to every invocation of the user handler. Exposes read-only
/// access to the worker's live options so a long-running handler can
/// react to a reload without the worker needing to restart it.
#[derive(Clone)]
pub struct WorkerHandle {
	options: Arc<RwLock<WireOptions>>,
}

impl WorkerHandle {
	pub(crate) fn new(options: Arc<RwLock<WireOptions>>) -> Self {
		Self { options }
	}

	/// A snapshot of the options as of the moment of the call.
	pub fn options(&self) -> WireOptions {
		self.options.read().expect("options lock poisoned").clone()
	}
}
