//! The runtime each forked worker process executes: bounded-concurrency
//! connection acceptance, status reporting, and reload/detach handling
//! over the control pipes it inherited from the supervisor.

mod accept;
mod control;
mod error;
mod handle;
mod listener;
mod shared;

pub use error::WorkerError;
pub use handle::WorkerHandle;
pub use listener::ListenerSet;

use prefork_core::{PipeReader, PipeWriter, WireOptions, WorkerState};
use shared::Shared;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

const LOG_TARGET: &str = "prefork::worker";

/// Runs a worker to completion: accepts connections on `listeners`,
/// hands each off to `handler`, reports status upstream, and watches
/// `downstream` for reload/detach commands. Returns once the worker has
/// fully drained and transitioned to `Exit`; the caller (the forked
/// child's `main`) is expected to hard-exit the process immediately
/// after, rather than reuse it for anything else.
pub fn run<H>(
	listeners: Vec<TcpListener>,
	options: WireOptions,
	upstream: PipeWriter,
	downstream: PipeReader,
	on_reload: Option<prefork_core::OnReload>,
	handler: H,
) -> Result<(), WorkerError>
where
	H: Fn(TcpStream, SocketAddr, WorkerHandle) + Send + Sync + 'static,
{
	let listener_set = ListenerSet::new(listeners)?;
	let shared = Arc::new(Shared::new(options, upstream));
	shared.send_status();

	let control_shared = Arc::clone(&shared);
	let control_thread = thread::Builder::new()
		.name("prefork-control".to_owned())
		.spawn(move || control::run(control_shared, downstream, on_reload))
		.expect("failed to spawn control thread");

	let handler = Arc::new(handler);
	let accept_result = accept::run(Arc::clone(&shared), listener_set, handler);
	if let Err(err) = &accept_result {
		tracing::warn!(target: LOG_TARGET, %err, "accept activity ended with an error");
	}
	shared.transition(WorkerState::Stop);

	// Listener fds are dropped with `listener_set` inside `accept::run`'s
	// stack frame; siblings keep accepting on the shared sockets.
	shared.join_all();
	shared.transition(WorkerState::Exit);

	// The control thread is blocked on a 5-second poll at worst; let it
	// run down in the background rather than joining it here, since the
	// caller is about to hard-exit the process regardless.
	drop(control_thread);

	accept_result
}
