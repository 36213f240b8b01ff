//! The thread-safe handle used to drive a running supervisor: `reload`,
//! `stop`, `stop_bang`, and `detach_children`. `Supervisor::start` blocks
//! the calling thread running the main loop, so these are meant to be
//! invoked from elsewhere — another thread, a signal handler, an admin
//! endpoint — against the handle returned by [`crate::Supervisor::control`].

use prefork_core::WireOptions;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A pending reconfiguration, applied at the top of the next main-loop
/// iteration.
pub struct ReloadSpec {
	pub listeners: Option<Vec<TcpListener>>,
	pub options: WireOptions,
}

pub(crate) struct ControlState {
	pub running: AtomicBool,
	pub force_stop: AtomicBool,
	pub detach_requested: AtomicBool,
	pub pending_reload: Mutex<Option<ReloadSpec>>,
	/// Count of workers in `state = run`, refreshed by the main loop on
	/// every tick; read by `detach_children`'s poll loop.
	pub live_run_count: AtomicUsize,
}

impl ControlState {
	pub fn new() -> Self {
		Self {
			running: AtomicBool::new(true),
			force_stop: AtomicBool::new(false),
			detach_requested: AtomicBool::new(false),
			pending_reload: Mutex::new(None),
			live_run_count: AtomicUsize::new(0),
		}
	}
}

/// A cloneable, `Send + Sync` handle to a running [`crate::Supervisor`].
#[derive(Clone)]
pub struct SupervisorControl {
	pub(crate) state: Arc<ControlState>,
}

impl SupervisorControl {
	/// Enqueues a new listener set and/or option set, applied at the top
	/// of the next main-loop iteration.
	pub fn reload(&self, listeners: Option<Vec<TcpListener>>, options: WireOptions) {
		*self.state.pending_reload.lock().expect("pending_reload lock poisoned") =
			Some(ReloadSpec { listeners, options });
	}

	/// Clears the running flag; the main loop exits after its current
	/// iteration. Workers are left to drain naturally.
	pub fn stop(&self) {
		self.state.running.store(false, Ordering::SeqCst);
	}

	/// Sends `SIGTERM` to every worker, then clears the running flag.
	pub fn stop_bang(&self) {
		self.state.force_stop.store(true, Ordering::SeqCst);
		self.state.running.store(false, Ordering::SeqCst);
	}

	/// Asks every worker to close its listeners and exit once its
	/// current connections end, then waits up to 5 seconds for all of
	/// them to report `state != run`. Returns whether they all drained
	/// in time.
	pub fn detach_children(&self) -> bool {
		self.state.detach_requested.store(true, Ordering::SeqCst);
		let deadline = Instant::now() + Duration::from_secs(5);
		while Instant::now() < deadline {
			if self.state.live_run_count.load(Ordering::SeqCst) == 0 {
				return true;
			}
			std::thread::sleep(Duration::from_millis(50));
		}
		self.state.live_run_count.load(Ordering::SeqCst) == 0
	}
}
