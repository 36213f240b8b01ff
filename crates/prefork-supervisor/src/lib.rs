//! The parent-process supervisor: owns the listening sockets, forks and
//! reaps a population of worker processes, and fans reload/detach
//! commands out to them over their control pipes.

mod control;
mod entry;
mod error;
mod main_loop;
mod spawn;

pub use control::SupervisorControl;
pub use error::SupervisorError;

use control::ControlState;
use entry::WorkerEntry;
use main_loop::Tick;
use prefork_core::{ControlMessage, SupervisorOptions};
use prefork_worker::WorkerHandle;
use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

const LOG_TARGET: &str = "prefork::supervisor";
const BIND_RETRY_WINDOW: Duration = Duration::from_secs(5);
const BIND_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const SHUTDOWN_REAP_CAP: Duration = Duration::from_secs(1);

pub struct Supervisor {
	listeners: Vec<TcpListener>,
	listeners_owned: bool,
	options: SupervisorOptions,
	control: Arc<ControlState>,
}

impl Supervisor {
	/// Binds on every interface that resolves from `addr`, owning the
	/// resulting listeners.
	pub fn bind(addr: impl ToSocketAddrs, options: SupervisorOptions) -> Result<Self, SupervisorError> {
		let listeners = bind_retrying(addr, options.wire.listen_backlog)?;
		if listeners.is_empty() {
			return Err(SupervisorError::NoListeners);
		}
		Ok(Self { listeners, listeners_owned: true, options, control: Arc::new(ControlState::new()) })
	}

	/// Uses a single caller-supplied, already-bound listener. The
	/// supervisor does not own it and will not close it on shutdown.
	pub fn with_listener(listener: TcpListener, options: SupervisorOptions) -> Self {
		Self::with_listeners(vec![listener], options)
	}

	/// Uses caller-supplied, already-bound listeners.
	pub fn with_listeners(listeners: Vec<TcpListener>, options: SupervisorOptions) -> Self {
		Self { listeners, listeners_owned: false, options, control: Arc::new(ControlState::new()) }
	}

	/// Returns a cloneable handle that can call `reload`/`stop`/`stop_bang`/
	/// `detach_children` on this supervisor from another thread while
	/// `start` is blocking the calling thread.
	pub fn control(&self) -> SupervisorControl {
		SupervisorControl { state: Arc::clone(&self.control) }
	}

	/// Runs the main loop until `stop` or `stop_bang` is called. Blocks
	/// the calling thread.
	pub fn start<H>(mut self, handler: H) -> Result<(), SupervisorError>
	where
		H: Fn(TcpStream, SocketAddr, WorkerHandle) + Send + Sync + 'static,
	{
		let handler = Arc::new(handler);
		let mut workers: BTreeMap<i32, WorkerEntry> = BTreeMap::new();

		while self.control.running.load(Ordering::SeqCst) {
			self.apply_pending_reload(&mut workers)?;

			if self.control.detach_requested.swap(false, Ordering::SeqCst) {
				main_loop::broadcast(&mut workers, &ControlMessage::Detach);
			}

			{
				let mut tick = self.tick(&mut workers, &handler);
				tick.watch_children()?;
				tick.adjust_children()?;
			}
		}

		if self.control.force_stop.load(Ordering::SeqCst) {
			for entry in workers.values() {
				let _ = prefork_core::send_signal(entry.pid, nix::sys::signal::Signal::SIGTERM);
			}
		}

		self.shutdown_tail(workers);
		Ok(())
	}

	fn tick<'a, H>(
		&'a self,
		workers: &'a mut BTreeMap<i32, WorkerEntry>,
		handler: &'a Arc<H>,
	) -> Tick<'a, H>
	where
		H: Fn(TcpStream, SocketAddr, WorkerHandle) + Send + Sync + 'static,
	{
		Tick {
			listeners: &self.listeners,
			options: &self.options.wire,
			workers,
			control: &self.control,
			on_start: self.options.on_start.as_ref(),
			on_reload: self.options.on_reload.as_ref(),
			on_child_start: self.options.on_child_start.as_ref(),
			on_child_exit: self.options.on_child_exit.as_ref(),
			handler,
		}
	}

	/// Applies a pending `reload(...)` call: rebinds listeners if new ones
	/// were supplied, reapplies a changed backlog, then broadcasts the
	/// new options to every live worker.
	fn apply_pending_reload(
		&mut self,
		workers: &mut BTreeMap<i32, WorkerEntry>,
	) -> Result<(), SupervisorError> {
		let Some(spec) = self.control.pending_reload.lock().expect("pending_reload lock poisoned").take()
		else {
			return Ok(());
		};

		if let Some(new_listeners) = spec.listeners {
			main_loop::broadcast(workers, &ControlMessage::Detach);
			self.listeners = new_listeners;
			self.listeners_owned = true;
		} else if spec.options.listen_backlog != self.options.wire.listen_backlog
			&& self.listeners_owned
		{
			if let Some(backlog) = spec.options.listen_backlog {
				for listener in &self.listeners {
					reapply_backlog(listener, backlog);
				}
			}
		}

		self.options.wire = spec.options.clone();
		main_loop::broadcast(workers, &ControlMessage::Reload { options: spec.options });
		Ok(())
	}

	/// Drops owned listeners, nudges every worker's downstream pipe
	/// closed, and reaps what it can within a 1-second budget before
	/// handing any stragglers off to a detached background reaper.
	fn shutdown_tail(self, mut workers: BTreeMap<i32, WorkerEntry>) {
		if self.listeners_owned {
			drop(self.listeners);
		}
		for entry in workers.values_mut() {
			drop(std::mem::replace(&mut entry.downstream_writer, loopback_writer()));
		}

		let deadline = Instant::now() + SHUTDOWN_REAP_CAP;
		while !workers.is_empty() && Instant::now() < deadline {
			reap_once(&mut workers);
			if !workers.is_empty() {
				std::thread::sleep(Duration::from_millis(20));
			}
		}

		if !workers.is_empty() {
			tracing::info!(target: LOG_TARGET, remaining = workers.len(), "shutdown cap elapsed, reaping the rest in the background");
			std::thread::spawn(move || {
				while !workers.is_empty() {
					reap_once(&mut workers);
					if !workers.is_empty() {
						std::thread::sleep(Duration::from_millis(100));
					}
				}
			});
		}
	}
}

fn reap_once(workers: &mut BTreeMap<i32, WorkerEntry>) {
	use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
	use nix::unistd::Pid;
	let pids: Vec<i32> = workers.keys().copied().collect();
	for pid in pids {
		if let Ok(status) = waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
			if !matches!(status, WaitStatus::StillAlive) {
				workers.remove(&pid);
			}
		}
	}
}

fn loopback_writer() -> prefork_core::PipeWriter {
	let (_, writer) = prefork_core::pipe_pair().expect("failed to create a throwaway pipe");
	writer
}

fn bind_retrying(
	addr: impl ToSocketAddrs,
	backlog: Option<u32>,
) -> Result<Vec<TcpListener>, SupervisorError> {
	let addrs: Vec<SocketAddr> = addr.to_socket_addrs()?.collect();
	let mut listeners = Vec::with_capacity(addrs.len());
	for addr in addrs {
		let started = Instant::now();
		loop {
			match TcpListener::bind(addr) {
				Ok(listener) => {
					if let Some(backlog) = backlog {
						reapply_backlog(&listener, backlog);
					}
					listeners.push(listener);
					break;
				},
				Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
					if started.elapsed() > BIND_RETRY_WINDOW {
						return Err(SupervisorError::BindTimedOut {
							addr: addr.to_string(),
							retried_for_secs: BIND_RETRY_WINDOW.as_secs(),
						});
					}
					std::thread::sleep(BIND_RETRY_INTERVAL);
				},
				Err(err) => return Err(err.into()),
			}
		}
	}
	Ok(listeners)
}

fn reapply_backlog(listener: &TcpListener, backlog: u32) {
	use std::os::fd::AsRawFd;
	// SAFETY: `listener`'s fd is valid for the duration of this call.
	let ret = unsafe { libc::listen(listener.as_raw_fd(), backlog as i32) };
	if ret != 0 {
		tracing::warn!(target: LOG_TARGET, "failed to reapply listen backlog: {}", std::io::Error::last_os_error());
	}
}
