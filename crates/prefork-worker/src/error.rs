use std::io;

/// Errors raised while running a worker's accept or control activity.
///
/// Almost nothing here is fatal to the *supervisor*: a worker that
/// returns `Err` from [`crate::run`] simply never respawns itself — the
/// supervisor notices its exit via end-of-stream on the upstream pipe
/// and reaps it on the next tick.
#[derive(thiserror::Error, Debug)]
pub enum WorkerError {
	#[error("io error: {0}")]
	Io(#[from] io::Error),
	#[error("core error: {0}")]
	Core(#[from] prefork_core::CoreError),
	#[error("wire error: {0}")]
	Wire(#[from] prefork_wire::WireError),
	#[error("no listeners were provided to the worker")]
	NoListeners,
}
