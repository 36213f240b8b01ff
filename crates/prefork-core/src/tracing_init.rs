//! Logging setup shared by the supervisor binary and every forked
//! worker.
//!
//! Workers cannot inherit the parent's in-process `tracing` subscriber
//! across `fork` — there is no live subscriber state to inherit, only
//! whatever this function installs fresh in that process. A binary
//! embedding the supervisor should call this once before
//! `Supervisor::start`, and the worker entrypoint calls it again after
//! `fork` for the same reason.
pub fn init_tracing() {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
	let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init();
}
