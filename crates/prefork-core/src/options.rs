//! The option set and the messages that cross the control channel.
//!
//! [`WireOptions`] is deliberately a different, smaller type than
//! [`SupervisorOptions`]: it is the serializable subset that actually
//! crosses the pipe on reload. Callback fields never implement
//! `Encode`/`Decode`, so there is no runtime filtering step to drop
//! values that aren't safely serializable — a callback simply cannot
//! appear in a [`WireOptions`] in the first place.

use parity_scale_codec::{Decode, Encode};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Identifies one accepted connection within a worker, for status
/// reporting purposes only.
pub type ConnId = u64;

/// A worker's lifecycle state. Transitions are monotone: `Run -> Stop ->
/// Exit`, enforced by `prefork-worker` rather than by this type.
#[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum WorkerState {
	#[default]
	Run,
	Stop,
	Exit,
}

/// The serializable subset of a worker's live options, sent whole to
/// every worker on every reload.
#[derive(Encode, Decode, Clone, PartialEq, Eq, Debug)]
pub struct WireOptions {
	pub min_processes: u32,
	pub max_processes: u32,
	pub max_threads: u32,
	pub standby_threads: u32,
	pub listen_backlog: Option<u32>,
	pub max_idle_millis: u64,
	pub max_use: u64,
	pub watchdog_timer_secs: u64,
	pub watchdog_signal: String,
}

impl WireOptions {
	pub fn max_idle(&self) -> Option<Duration> {
		if self.max_idle_millis == 0 {
			None
		} else {
			Some(Duration::from_millis(self.max_idle_millis))
		}
	}

	pub fn watchdog_timer(&self) -> Duration {
		Duration::from_secs(self.watchdog_timer_secs)
	}
}

impl Default for WireOptions {
	fn default() -> Self {
		Self {
			min_processes: 5,
			max_processes: 20,
			max_threads: 1,
			standby_threads: 5,
			listen_backlog: None,
			max_idle_millis: 10_000,
			max_use: 1000,
			watchdog_timer_secs: 600,
			watchdog_signal: "TERM".to_owned(),
		}
	}
}

/// Invoked in the child immediately after fork, before the accept loop
/// starts. Takes no arguments and returns nothing; failures must be
/// handled (logged) by the callback itself, never by panicking across
/// the fork boundary.
pub type OnStart = Arc<dyn Fn() + Send + Sync>;
/// Invoked in the child on every reload, with the freshly merged options.
pub type OnReload = Arc<dyn Fn(&WireOptions) + Send + Sync>;
/// Invoked in the parent right after a worker is forked.
pub type OnChildStart = Arc<dyn Fn(i32) + Send + Sync>;
/// Invoked in the parent once a worker has been reaped.
pub type OnChildExit = Arc<dyn Fn(i32, std::process::ExitStatus) + Send + Sync>;

/// The full, Rust-side option set: the wire-serializable core plus the
/// four lifecycle callbacks, which never leave the process they were
/// configured in.
#[derive(Clone)]
pub struct SupervisorOptions {
	pub wire: WireOptions,
	pub on_start: Option<OnStart>,
	pub on_reload: Option<OnReload>,
	pub on_child_start: Option<OnChildStart>,
	pub on_child_exit: Option<OnChildExit>,
}

impl std::fmt::Debug for SupervisorOptions {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SupervisorOptions")
			.field("wire", &self.wire)
			.field("on_start", &self.on_start.is_some())
			.field("on_reload", &self.on_reload.is_some())
			.field("on_child_start", &self.on_child_start.is_some())
			.field("on_child_exit", &self.on_child_exit.is_some())
			.finish()
	}
}

impl Default for SupervisorOptions {
	fn default() -> Self {
		Self {
			wire: WireOptions::default(),
			on_start: None,
			on_reload: None,
			on_child_start: None,
			on_child_exit: None,
		}
	}
}

macro_rules! with_wire_field {
	($name:ident, $field:ident, $ty:ty) => {
		pub fn $name(mut self, value: $ty) -> Self {
			self.wire.$field = value;
			self
		}
	};
}

impl SupervisorOptions {
	with_wire_field!(with_min_processes, min_processes, u32);
	with_wire_field!(with_max_processes, max_processes, u32);
	with_wire_field!(with_max_threads, max_threads, u32);
	with_wire_field!(with_standby_threads, standby_threads, u32);
	with_wire_field!(with_listen_backlog, listen_backlog, Option<u32>);
	with_wire_field!(with_max_use, max_use, u64);
	with_wire_field!(with_watchdog_timer_secs, watchdog_timer_secs, u64);

	pub fn with_max_idle(mut self, max_idle: Option<Duration>) -> Self {
		self.wire.max_idle_millis = max_idle.map(|d| d.as_millis() as u64).unwrap_or(0);
		self
	}

	pub fn with_watchdog_signal(mut self, signal: impl Into<String>) -> Self {
		self.wire.watchdog_signal = signal.into();
		self
	}

	pub fn with_on_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
		self.on_start = Some(Arc::new(f));
		self
	}

	pub fn with_on_reload(mut self, f: impl Fn(&WireOptions) + Send + Sync + 'static) -> Self {
		self.on_reload = Some(Arc::new(f));
		self
	}

	pub fn with_on_child_start(mut self, f: impl Fn(i32) + Send + Sync + 'static) -> Self {
		self.on_child_start = Some(Arc::new(f));
		self
	}

	pub fn with_on_child_exit(
		mut self,
		f: impl Fn(i32, std::process::ExitStatus) + Send + Sync + 'static,
	) -> Self {
		self.on_child_exit = Some(Arc::new(f));
		self
	}
}

/// A worker's status, as reported upstream on task start/end, status
/// transitions, and heartbeats.
#[derive(Encode, Decode, Clone, PartialEq, Eq, Debug, Default)]
pub struct StatusMessage {
	pub state: WorkerState,
	/// Remote address (as formatted by `SocketAddr::to_string`) of each
	/// in-flight connection, keyed by an opaque per-task id.
	pub connections: BTreeMap<ConnId, String>,
}

impl StatusMessage {
	/// The empty status sent as a heartbeat when the control loop's
	/// 5-second wait times out without a command arriving.
	pub fn heartbeat(state: WorkerState) -> Self {
		Self { state, connections: BTreeMap::new() }
	}
}

/// A command sent down the downstream pipe.
#[derive(Encode, Decode, Clone, PartialEq, Eq, Debug)]
pub enum ControlMessage {
	Reload { options: WireOptions },
	Detach,
}
