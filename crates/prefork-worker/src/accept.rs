//! The accept activity: bounded-concurrency connection acceptance
//! across every listener this worker inherited.

use crate::error::WorkerError;
use crate::handle::WorkerHandle;
use crate::listener::ListenerSet;
use crate::shared::Shared;
use prefork_core::WorkerState;
use std::net::{SocketAddr, TcpStream};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

const LOG_TARGET: &str = "prefork::worker::accept";

pub fn run<H>(shared: Arc<Shared>, mut listeners: ListenerSet, handler: Arc<H>) -> Result<(), WorkerError>
where
	H: Fn(TcpStream, SocketAddr, WorkerHandle) + Send + Sync + 'static,
{
	while shared.state() == WorkerState::Run {
		let max_threads = shared.options.read().expect("options lock poisoned").max_threads;
		shared.wait_for_capacity(max_threads);
		if shared.state() != WorkerState::Run {
			break;
		}

		let max_idle = shared.options.read().expect("options lock poisoned").max_idle();
		let readable = listeners.wait_readable(max_idle)?;
		if !readable {
			if shared.ever_accepted.load(Ordering::Acquire) {
				tracing::debug!(target: LOG_TARGET, "idle timeout elapsed, stopping");
				shared.transition(WorkerState::Stop);
				break;
			}
			// Before the first accept, idle timeout is ignored.
			continue;
		}

		let accepted = match listeners.try_accept() {
			Ok(accepted) => accepted,
			Err(err) => {
				tracing::warn!(target: LOG_TARGET, %err, "accept failed, stopping");
				shared.transition(WorkerState::Stop);
				break;
			},
		};
		let Some((stream, addr)) = accepted else {
			// Lost the race with a sibling worker; go back to waiting.
			continue;
		};

		shared.ever_accepted.store(true, Ordering::Release);
		let use_count = shared.use_count.fetch_add(1, Ordering::AcqRel) + 1;

		spawn_handler_task(&shared, &handler, stream, addr);

		let max_use = shared.options.read().expect("options lock poisoned").max_use;
		if max_use > 0 && use_count >= max_use {
			tracing::debug!(target: LOG_TARGET, use_count, max_use, "max_use reached, stopping");
			shared.transition(WorkerState::Stop);
			break;
		}
	}
	Ok(())
}

fn spawn_handler_task<H>(shared: &Arc<Shared>, handler: &Arc<H>, stream: TcpStream, addr: SocketAddr)
where
	H: Fn(TcpStream, SocketAddr, WorkerHandle) + Send + Sync + 'static,
{
	let conn_id = shared.next_conn_id();
	shared.mark_connected(conn_id, addr.to_string());

	let worker_handle = WorkerHandle::new(shared.options_handle());
	let thread_shared = Arc::clone(shared);
	let handler = Arc::clone(handler);

	let join = thread::Builder::new()
		.name(format!("prefork-conn-{conn_id}"))
		.spawn(move || {
			let outcome = catch_unwind(AssertUnwindSafe(|| handler(stream, addr, worker_handle)));
			if let Err(panic) = outcome {
				let message = prefork_core::stringify_panic(panic);
				tracing::error!(target: LOG_TARGET, %addr, %message, "handler panicked");
			}
			thread_shared.mark_disconnected(conn_id);
		})
		.expect("failed to spawn handler thread");
	shared.push_handle(join);
}
