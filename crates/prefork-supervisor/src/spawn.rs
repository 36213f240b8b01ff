//! Worker spawn: two pipes, a fork, and careful fd bookkeeping so a
//! freshly forked child never holds onto a sibling's end of its control
//! pipes.

use crate::entry::WorkerEntry;
use crate::error::SupervisorError;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::{close, fork, ForkResult};
use prefork_core::{pipe_pair, OnChildStart, OnReload, OnStart, WireOptions};
use prefork_worker::WorkerHandle;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

pub fn spawn_worker<H>(
	listeners: &[TcpListener],
	options: &WireOptions,
	sibling_fds: &[i32],
	on_start: Option<&OnStart>,
	on_reload: Option<&OnReload>,
	on_child_start: Option<&OnChildStart>,
	handler: &Arc<H>,
) -> Result<WorkerEntry, SupervisorError>
where
	H: Fn(TcpStream, SocketAddr, WorkerHandle) + Send + Sync + 'static,
{
	let (upstream_reader, upstream_writer) = pipe_pair()?;
	let (downstream_reader, downstream_writer) = pipe_pair()?;

	// SAFETY: the supervisor's main loop runs on a single thread; no
	// other thread in this process is holding a lock or mutating shared
	// state concurrently with this fork.
	match unsafe { fork() }? {
		ForkResult::Child => {
			drop(upstream_reader);
			drop(downstream_writer);
			for &fd in sibling_fds {
				let _ = close(fd);
			}

			// A worker is killed by `SIGTERM`/the watchdog signal, not
			// handled by one; reset whatever disposition the embedding
			// process installed (e.g. its own graceful-shutdown handler)
			// back to default so that delivery actually terminates it.
			// SAFETY: single-threaded at this point, right after fork.
			unsafe {
				let _ = sigaction(
					Signal::SIGTERM,
					&SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty()),
				);
			}

			prefork_core::init_tracing();

			let child_listeners: std::io::Result<Vec<TcpListener>> =
				listeners.iter().map(TcpListener::try_clone).collect();
			let child_listeners = child_listeners.expect("failed to clone inherited listener");

			if let Some(on_start) = on_start {
				let on_start = Arc::clone(on_start);
				prefork_core::call_guarded(crate::LOG_TARGET, "on_start", move || on_start());
			}

			let handler = Arc::clone(handler);
			let result = prefork_worker::run(
				child_listeners,
				options.clone(),
				upstream_writer,
				downstream_reader,
				on_reload.cloned(),
				move |stream, addr, handle| handler(stream, addr, handle),
			);
			if let Err(err) = result {
				tracing::error!(target: crate::LOG_TARGET, %err, "worker runtime exited with an error");
				std::process::exit(1);
			}
			std::process::exit(0);
		},
		ForkResult::Parent { child } => {
			drop(upstream_writer);
			drop(downstream_reader);
			let pid = child.as_raw();
			if let Some(on_child_start) = on_child_start {
				let on_child_start = Arc::clone(on_child_start);
				prefork_core::call_guarded(crate::LOG_TARGET, "on_child_start", move || {
					on_child_start(pid)
				});
			}
			Ok(WorkerEntry::new(pid, upstream_reader, downstream_writer))
		},
	}
}
