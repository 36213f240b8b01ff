use std::io;

/// Errors raised by the shared primitives (pipes, signals, options) that
/// both the worker and supervisor crates build on.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
	#[error("io error: {0}")]
	Io(#[from] io::Error),
	#[error("wire error: {0}")]
	Wire(#[from] prefork_wire::WireError),
	#[error("nix error: {0}")]
	Nix(#[from] nix::Error),
	#[error("unknown signal name: {0}")]
	UnknownSignal(String),
}
