//! Shared types for the prefork supervisor: the option set, the wire
//! messages exchanged over the control pipes, and the pipe/signal
//! primitives both the worker and supervisor crates build on.

mod error;
mod options;
mod panic;
mod pipe;
mod signal;
mod tracing_init;

pub use error::CoreError;
pub use options::{
	ConnId, ControlMessage, OnChildExit, OnChildStart, OnReload, OnStart, StatusMessage,
	SupervisorOptions, WireOptions, WorkerState,
};
pub use panic::{call_guarded, stringify_panic};
pub use pipe::{pipe_pair, set_nonblocking, PipeReader, PipeWriter};
pub use signal::{parse_signal, send_signal};
pub use tracing_init::init_tracing;
