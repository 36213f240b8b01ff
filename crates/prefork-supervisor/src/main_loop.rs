//! The supervisory tick: watch children, reap, and adjust population.

use crate::control::ControlState;
use crate::entry::{WatchdogAction, WorkerEntry};
use crate::error::SupervisorError;
use crate::spawn::spawn_worker;
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use prefork_core::{parse_signal, send_signal, ControlMessage, OnChildExit, OnChildStart, OnReload, OnStart, WireOptions};
use prefork_worker::WorkerHandle;
use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

const LOG_TARGET: &str = "prefork::supervisor";
const WATCH_TIMEOUT_MILLIS: u16 = 100;
const BROADCAST_WRITE_CAP: Duration = Duration::from_secs(1);

pub struct Tick<'a, H> {
	pub listeners: &'a [TcpListener],
	pub options: &'a WireOptions,
	pub workers: &'a mut BTreeMap<i32, WorkerEntry>,
	pub control: &'a ControlState,
	pub on_start: Option<&'a OnStart>,
	pub on_reload: Option<&'a OnReload>,
	pub on_child_start: Option<&'a OnChildStart>,
	pub on_child_exit: Option<&'a OnChildExit>,
	pub handler: &'a Arc<H>,
}

impl<'a, H> Tick<'a, H>
where
	H: Fn(TcpStream, SocketAddr, WorkerHandle) + Send + Sync + 'static,
{
	/// Polls every live worker's upstream pipe, merges in whatever
	/// status arrived, then runs the watchdog and reap passes.
	pub fn watch_children(&mut self) -> Result<(), SupervisorError> {
		if self.workers.is_empty() {
			std::thread::sleep(Duration::from_millis(WATCH_TIMEOUT_MILLIS as u64));
			return Ok(());
		}

		let live_fds: Vec<(i32, i32)> = self
			.workers
			.iter()
			.filter(|(_, e)| !e.upstream_closed)
			.map(|(&pid, e)| (pid, e.upstream_reader.as_raw_fd()))
			.collect();
		// SAFETY: `fd` stays valid for the poll call; the entry it belongs
		// to is not dropped while `borrowed_fds`/`poll_fds` are alive.
		let borrowed_fds: Vec<std::os::fd::BorrowedFd> = live_fds
			.iter()
			.map(|(_, fd)| unsafe { std::os::fd::BorrowedFd::borrow_raw(*fd) })
			.collect();
		let mut poll_fds: Vec<PollFd> = borrowed_fds
			.iter()
			.map(|fd| PollFd::new(fd, PollFlags::POLLIN))
			.collect();

		poll(&mut poll_fds, WATCH_TIMEOUT_MILLIS as libc::c_int)?;

		let mut closed = Vec::new();
		for ((pid, _), poll_fd) in live_fds.iter().zip(poll_fds.iter()) {
			let Some(revents) = poll_fd.revents() else { continue };
			if revents.is_empty() {
				continue;
			}
			let entry = self.workers.get_mut(pid).expect("worker entry vanished mid-tick");
			match prefork_wire::recv_message(&mut entry.upstream_reader) {
				Ok(Some(status)) => entry.merge_status(status),
				Ok(None) => {
					tracing::debug!(target: LOG_TARGET, pid, "upstream pipe closed");
					entry.upstream_closed = true;
					closed.push(*pid);
				},
				Err(err) => {
					tracing::warn!(target: LOG_TARGET, pid, %err, "failed to read worker status");
					entry.upstream_closed = true;
					closed.push(*pid);
				},
			}
		}

		self.run_watchdog();
		self.reap(&closed);
		self.control.live_run_count.store(
			self.workers.values().filter(|e| e.is_live()).count(),
			Ordering::SeqCst,
		);
		Ok(())
	}

	fn run_watchdog(&mut self) {
		let watchdog_timer = self.options.watchdog_timer();
		let Ok(signal) = parse_signal(&self.options.watchdog_signal) else {
			tracing::warn!(target: LOG_TARGET, signal = %self.options.watchdog_signal, "unknown watchdog signal, skipping watchdog pass");
			return;
		};
		for entry in self.workers.values_mut() {
			match entry.watchdog_action(watchdog_timer) {
				Some(WatchdogAction::Signal) => {
					tracing::warn!(target: LOG_TARGET, pid = entry.pid, "heartbeat deadline exceeded, signalling");
					let _ = send_signal(entry.pid, signal);
					entry.signal_sent = true;
				},
				Some(WatchdogAction::Kill) => {
					tracing::warn!(target: LOG_TARGET, pid = entry.pid, "heartbeat deadline exceeded well past grace period, killing");
					let _ = send_signal(entry.pid, Signal::SIGKILL);
				},
				None => {},
			}
		}
	}

	/// Non-blocking `waitpid` on every tracked pid.
	fn reap(&mut self, just_closed: &[i32]) {
		let mut reaped = Vec::new();
		for &pid in self.workers.keys() {
			match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
				Ok(WaitStatus::StillAlive) | Err(_) => {},
				Ok(status) => reaped.push((pid, status)),
			}
		}
		for (pid, status) in reaped {
			self.workers.remove(&pid);
			if let Some(on_child_exit) = self.on_child_exit {
				let on_child_exit = Arc::clone(on_child_exit);
				let exit_status = exit_status_of(status);
				prefork_core::call_guarded(LOG_TARGET, "on_child_exit", move || {
					on_child_exit(pid, exit_status)
				});
			}
		}
		for &pid in just_closed {
			// EOS without a confirmed reap yet: leave it tracked, `waitpid`
			// will confirm on a later tick.
			if self.workers.contains_key(&pid) {
				tracing::trace!(target: LOG_TARGET, pid, "worker pipe closed, awaiting reap");
			}
		}
	}

	/// Spawns up to the floor, then sizes the rest of the population by
	/// standby capacity.
	pub fn adjust_children(&mut self) -> Result<(), SupervisorError> {
		let live = self.workers.values().filter(|e| e.is_live()).count() as u32;
		let to_floor = self.options.min_processes.saturating_sub(live);
		let mut spawned = 0u32;
		for _ in 0..to_floor {
			self.spawn_one()?;
			spawned += 1;
		}

		let live = live + spawned;
		let max_threads = self.options.max_threads.max(1);
		let capacity = live * max_threads;
		let connections: u32 = self
			.workers
			.values()
			.filter(|e| e.is_live())
			.map(|e| e.last_status.connections.len() as u32)
			.sum();
		let wanted = connections + self.options.standby_threads;
		let required =
			if wanted > capacity { (wanted - capacity).div_ceil(max_threads) } else { 0 };
		let additional = required.min(self.options.max_processes.saturating_sub(live));
		for _ in 0..additional {
			self.spawn_one()?;
		}
		Ok(())
	}

	fn spawn_one(&mut self) -> Result<(), SupervisorError> {
		let sibling_fds: Vec<i32> = self
			.workers
			.values()
			.flat_map(|e| [e.upstream_reader.as_raw_fd(), e.downstream_writer.as_raw_fd()])
			.collect();
		let entry = spawn_worker(
			self.listeners,
			self.options,
			&sibling_fds,
			self.on_start,
			self.on_reload,
			self.on_child_start,
			self.handler,
		)?;
		self.workers.insert(entry.pid, entry);
		Ok(())
	}

}

/// One writer per worker, each bounded to a 1-second deadline so a
/// stalled worker never stalls the rest.
pub fn broadcast(workers: &mut BTreeMap<i32, WorkerEntry>, message: &ControlMessage) {
	for (&pid, entry) in workers.iter_mut() {
		let deadline = Instant::now() + BROADCAST_WRITE_CAP;
		prefork_core::set_nonblocking(&entry.downstream_writer).ok();
		if let Err(err) = prefork_wire::send_message(&mut entry.downstream_writer, message) {
			tracing::debug!(target: LOG_TARGET, pid, %err, "broadcast write failed, worker presumed gone");
		}
		if Instant::now() > deadline {
			tracing::warn!(target: LOG_TARGET, pid, "broadcast write exceeded its deadline");
		}
	}
}

fn exit_status_of(status: WaitStatus) -> std::process::ExitStatus {
	use std::os::unix::process::ExitStatusExt;
	match status {
		WaitStatus::Exited(_, code) => std::process::ExitStatus::from_raw(code << 8),
		WaitStatus::Signaled(_, signal, _) => std::process::ExitStatus::from_raw(signal as i32),
		_ => std::process::ExitStatus::from_raw(0),
	}
}
