//! The set of inherited listening sockets a worker accepts on, and the
//! `mio`-backed readiness wait used by the accept activity: block until
//! any listener is readable, or the configured idle timeout elapses.

use crate::error::WorkerError;
use mio::net::TcpListener as MioTcpListener;
use mio::{Events, Interest, Poll, Token};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{FromRawFd, IntoRawFd};
use std::time::Duration;

pub struct ListenerSet {
	listeners: Vec<MioTcpListener>,
	poll: Poll,
	events: Events,
}

impl ListenerSet {
	/// Takes ownership of the inherited std listeners, puts each into
	/// non-blocking mode, and registers them with a fresh `mio::Poll`.
	pub fn new(listeners: Vec<TcpListener>) -> Result<Self, WorkerError> {
		if listeners.is_empty() {
			return Err(WorkerError::NoListeners);
		}
		let poll = Poll::new()?;
		let mut mio_listeners = Vec::with_capacity(listeners.len());
		for (idx, listener) in listeners.into_iter().enumerate() {
			listener.set_nonblocking(true)?;
			let mut mio_listener = MioTcpListener::from_std(listener);
			poll.registry().register(&mut mio_listener, Token(idx), Interest::READABLE)?;
			mio_listeners.push(mio_listener);
		}
		Ok(Self { listeners: mio_listeners, poll, events: Events::with_capacity(16) })
	}

	/// Blocks until at least one listener is readable, or `timeout`
	/// elapses (`None` blocks indefinitely, matching `max_idle <= 0`).
	/// Returns `false` on timeout.
	pub fn wait_readable(&mut self, timeout: Option<Duration>) -> Result<bool, WorkerError> {
		self.events.clear();
		self.poll.poll(&mut self.events, timeout)?;
		Ok(!self.events.is_empty())
	}

	/// Tries to accept once from every listener, returning the first
	/// success. `WouldBlock` on a given listener is not an error here —
	/// it just means a sibling worker won the kernel-level race.
	pub fn try_accept(&mut self) -> Result<Option<(TcpStream, SocketAddr)>, WorkerError> {
		for listener in &mut self.listeners {
			match listener.accept() {
				Ok((stream, addr)) => {
					// mio's TcpStream is the same fd in non-blocking mode;
					// handler tasks run on a dedicated thread and expect
					// ordinary blocking socket semantics.
					let stream = unsafe { TcpStream::from_raw_fd(stream.into_raw_fd()) };
					stream.set_nonblocking(false)?;
					return Ok(Some((stream, addr)));
				},
				Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
				Err(err) => return Err(err.into()),
			}
		}
		Ok(None)
	}
}

impl Drop for ListenerSet {
	fn drop(&mut self) {
		for listener in &mut self.listeners {
			let _ = self.poll.registry().deregister(listener);
		}
	}
}
