use std::io;

/// Errors raised by the parent supervisor. Most failure modes described
/// in the taxonomy (peer-gone pipes, reap races, broadcast stalls) never
/// reach this type — they are swallowed and logged where they occur, per
/// the design. What remains here is what the taxonomy calls fatal at
/// construction or bind time.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
	#[error("io error: {0}")]
	Io(#[from] io::Error),
	#[error("core error: {0}")]
	Core(#[from] prefork_core::CoreError),
	#[error("wire error: {0}")]
	Wire(#[from] prefork_wire::WireError),
	#[error("nix error: {0}")]
	Nix(#[from] nix::Error),
	#[error("no listening address or listener was provided")]
	NoListeners,
	#[error("could not bind {addr}: still in use after retrying for {retried_for_secs}s")]
	BindTimedOut { addr: String, retried_for_secs: u64 },
}
