use prefork_core::{PipeReader, PipeWriter, StatusMessage, WorkerState};
use std::time::{Duration, Instant};

/// What the supervisor knows about one live worker: its pid, its two
/// pipe ends, and the most recent status it reported.
pub struct WorkerEntry {
	pub pid: i32,
	pub upstream_reader: PipeReader,
	pub downstream_writer: PipeWriter,
	pub last_status: StatusMessage,
	pub last_heartbeat_time: Instant,
	pub signal_sent: bool,
	/// Set once the upstream pipe hits end-of-stream; the pid is kept
	/// around (just not polled for readability any more) until `waitpid`
	/// confirms the exit.
	pub upstream_closed: bool,
}

impl WorkerEntry {
	pub fn new(pid: i32, upstream_reader: PipeReader, downstream_writer: PipeWriter) -> Self {
		Self {
			pid,
			upstream_reader,
			downstream_writer,
			// Seeded at spawn time, before any status has actually arrived.
			// This makes a freshly spawned worker watchdog-eligible from the
			// moment of fork; preserved as-is rather than special-cased.
			last_status: StatusMessage::default(),
			last_heartbeat_time: Instant::now(),
			signal_sent: false,
			upstream_closed: false,
		}
	}

	pub fn is_live(&self) -> bool {
		self.last_status.state == WorkerState::Run
	}

	pub fn merge_status(&mut self, status: StatusMessage) {
		self.last_status = status;
		self.last_heartbeat_time = Instant::now();
	}

	/// Returns the signal to send, if this worker's heartbeat deadline
	/// has been exceeded.
	pub fn watchdog_action(&self, watchdog_timer: Duration) -> Option<WatchdogAction> {
		let elapsed = self.last_heartbeat_time.elapsed();
		if elapsed > watchdog_timer + Duration::from_secs(60) {
			Some(WatchdogAction::Kill)
		} else if elapsed > watchdog_timer && !self.signal_sent {
			Some(WatchdogAction::Signal)
		} else {
			None
		}
	}
}

pub enum WatchdogAction {
	Signal,
	Kill,
}
