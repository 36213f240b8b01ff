use prefork_core::{ConnId, PipeWriter, StatusMessage, WireOptions, WorkerState};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;

const LOG_TARGET: &str = "prefork::worker";

/// State shared between the accept activity, the control activity, and
/// every in-flight handler task, coordinated by a mutex and condition
/// variable over the `in_flight` set.
pub struct Shared {
	state: Mutex<WorkerState>,
	cvar: Condvar,
	in_flight: Mutex<BTreeMap<ConnId, String>>,
	handles: Mutex<Vec<JoinHandle<()>>>,
	next_conn_id: AtomicU64,
	pub(crate) use_count: AtomicU64,
	pub(crate) ever_accepted: AtomicBool,
	pub(crate) options: Arc<RwLock<WireOptions>>,
	upstream: Mutex<PipeWriter>,
}

impl Shared {
	pub fn new(options: WireOptions, upstream: PipeWriter) -> Self {
		Self {
			state: Mutex::new(WorkerState::Run),
			cvar: Condvar::new(),
			in_flight: Mutex::new(BTreeMap::new()),
			handles: Mutex::new(Vec::new()),
			next_conn_id: AtomicU64::new(0),
			use_count: AtomicU64::new(0),
			ever_accepted: AtomicBool::new(false),
			options: Arc::new(RwLock::new(options)),
			upstream: Mutex::new(upstream),
		}
	}

	pub fn options_handle(&self) -> Arc<RwLock<WireOptions>> {
		Arc::clone(&self.options)
	}

	pub fn state(&self) -> WorkerState {
		*self.state.lock().expect("state lock poisoned")
	}

	/// Monotone transition: `run -> stop -> exit`, never backward.
	pub fn transition(&self, next: WorkerState) {
		let mut state = self.state.lock().expect("state lock poisoned");
		if next as u8 > *state as u8 {
			*state = next;
			drop(state);
			self.cvar.notify_all();
			self.send_status();
		}
	}

	pub fn next_conn_id(&self) -> ConnId {
		self.next_conn_id.fetch_add(1, Ordering::Relaxed)
	}

	/// Blocks the accept activity until either a slot frees up or the
	/// worker stops accepting, whichever comes first.
	pub fn wait_for_capacity(&self, max_threads: u32) {
		let guard = self.in_flight.lock().expect("in_flight lock poisoned");
		let _guard = self
			.cvar
			.wait_while(guard, |in_flight| {
				self.state() == WorkerState::Run && in_flight.len() >= max_threads as usize
			})
			.expect("in_flight lock poisoned");
	}

	pub fn mark_connected(&self, conn_id: ConnId, remote_addr: String) {
		self.in_flight.lock().expect("in_flight lock poisoned").insert(conn_id, remote_addr);
		self.send_status();
	}

	pub fn mark_disconnected(&self, conn_id: ConnId) {
		self.in_flight.lock().expect("in_flight lock poisoned").remove(&conn_id);
		self.cvar.notify_all();
		self.send_status();
	}

	pub fn push_handle(&self, handle: JoinHandle<()>) {
		self.handles.lock().expect("handles lock poisoned").push(handle);
	}

	/// Joins every handler task spawned so far. Called once, from the
	/// shutdown sequence, after the accept activity has stopped.
	pub fn join_all(&self) {
		let handles = std::mem::take(&mut *self.handles.lock().expect("handles lock poisoned"));
		for handle in handles {
			if handle.join().is_err() {
				tracing::warn!(target: LOG_TARGET, "a handler task panicked");
			}
		}
	}

	pub fn send_status(&self) {
		let state = self.state();
		let connections = self.in_flight.lock().expect("in_flight lock poisoned").clone();
		let message = StatusMessage { state, connections };
		self.send_upstream(&message);
	}

	/// Sends the empty status message that proves liveness when the control
	/// activity's downstream wait times out without a command arriving.
	pub fn send_heartbeat(&self) {
		self.send_upstream(&StatusMessage::heartbeat(self.state()));
	}

	fn send_upstream(&self, message: &StatusMessage) {
		let mut upstream = self.upstream.lock().expect("upstream lock poisoned");
		if let Err(err) = prefork_wire::send_message(&mut *upstream, message) {
			tracing::debug!(target: LOG_TARGET, %err, "failed to send status upstream, parent likely gone");
		}
	}

	pub fn wake_accept_activity(&self) {
		self.cvar.notify_all();
	}
}
