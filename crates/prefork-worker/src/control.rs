//! The control activity: watches the downstream pipe for reload/detach
//! commands and sends heartbeats when it's quiet.

use crate::shared::Shared;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use prefork_core::{ControlMessage, OnReload, PipeReader, WorkerState};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

const LOG_TARGET: &str = "prefork::worker::control";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const DOWNSTREAM_TOKEN: Token = Token(0);

pub fn run(shared: Arc<Shared>, mut downstream: PipeReader, on_reload: Option<OnReload>) {
	if let Err(err) = run_inner(&shared, &mut downstream, on_reload) {
		tracing::warn!(target: LOG_TARGET, %err, "control activity ended with an error");
	}
	shared.transition(WorkerState::Stop);
}

fn run_inner(
	shared: &Arc<Shared>,
	downstream: &mut PipeReader,
	on_reload: Option<OnReload>,
) -> Result<(), prefork_core::CoreError> {
	let mut poll = Poll::new()?;
	poll.registry().register(
		&mut SourceFd(&downstream.as_raw_fd()),
		DOWNSTREAM_TOKEN,
		Interest::READABLE,
	)?;
	let mut events = Events::with_capacity(4);

	loop {
		if shared.state() != WorkerState::Run {
			return Ok(());
		}

		events.clear();
		poll.poll(&mut events, Some(HEARTBEAT_INTERVAL))?;

		if events.is_empty() {
			shared.send_heartbeat();
			continue;
		}

		match prefork_wire::recv_message::<_, ControlMessage>(downstream) {
			Ok(Some(ControlMessage::Detach)) => {
				tracing::debug!(target: LOG_TARGET, "detach requested");
				shared.transition(WorkerState::Stop);
				return Ok(());
			},
			Ok(Some(ControlMessage::Reload { options })) => {
				tracing::debug!(target: LOG_TARGET, "applying reloaded options");
				if let Some(callback) = &on_reload {
					let callback = Arc::clone(callback);
					let options_for_callback = options.clone();
					prefork_core::call_guarded(LOG_TARGET, "on_reload", move || {
						callback(&options_for_callback)
					});
				}
				*shared.options.write().expect("options lock poisoned") = options;
				shared.wake_accept_activity();
			},
			Ok(None) => {
				tracing::debug!(target: LOG_TARGET, "downstream pipe closed, stopping");
				shared.transition(WorkerState::Stop);
				return Ok(());
			},
			Err(err) => return Err(err.into()),
		}
	}
}
