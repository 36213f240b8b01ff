//! POSIX signal helpers used by the supervisor's watchdog and `stop!`.

use crate::error::CoreError;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Parses a signal name (`"TERM"`, `"SIGTERM"`, `"KILL"`, ...) the way
/// [`SupervisorOptions::watchdog_signal`] accepts it from configuration.
pub fn parse_signal(name: &str) -> Result<Signal, CoreError> {
	let trimmed = name.trim().to_uppercase();
	let candidates = [trimmed.clone(), format!("SIG{trimmed}")];
	for candidate in candidates {
		if let Ok(signal) = candidate.parse::<Signal>() {
			return Ok(signal);
		}
	}
	Err(CoreError::UnknownSignal(name.to_owned()))
}

/// Sends `signal` to `pid`. A missing process (already reaped, or never
/// existed) is not an error here — the caller's next reap pass will
/// discover that on its own.
pub fn send_signal(pid: i32, signal: Signal) -> Result<(), CoreError> {
	match kill(Pid::from_raw(pid), signal) {
		Ok(()) => Ok(()),
		Err(nix::Error::ESRCH) => Ok(()),
		Err(err) => Err(err.into()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_bare_and_prefixed_names() {
		assert_eq!(parse_signal("TERM").unwrap(), Signal::SIGTERM);
		assert_eq!(parse_signal("SIGTERM").unwrap(), Signal::SIGTERM);
		assert_eq!(parse_signal("kill").unwrap(), Signal::SIGKILL);
	}

	#[test]
	fn rejects_unknown_names() {
		assert!(parse_signal("NOT_A_SIGNAL").is_err());
	}

	#[test]
	fn signalling_a_dead_pid_is_not_an_error() {
		// A pid this large is virtually guaranteed not to exist.
		send_signal(i32::MAX - 1, Signal::SIGTERM).unwrap();
	}
}
