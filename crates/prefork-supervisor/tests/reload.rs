//! `on_reload` fires in every live child exactly once per `reload(...)`
//! call. `on_reload` runs inside the forked child, so the only way to
//! observe it from the test process is a side channel that survives
//! `fork` — a shared file via `tempfile`.

use prefork_core::SupervisorOptions;
use prefork_supervisor::Supervisor;
use std::fs;
use std::io::Write;
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_for<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
	let deadline = Instant::now() + timeout;
	while Instant::now() < deadline {
		if check() {
			return true;
		}
		thread::sleep(Duration::from_millis(20));
	}
	check()
}

#[test]
fn on_reload_fires_once_per_live_child() {
	let scratch = tempfile::NamedTempFile::new().unwrap();
	let scratch_path = scratch.path().to_path_buf();

	let started = Arc::new(AtomicUsize::new(0));
	let started_cb = Arc::clone(&started);

	let reload_path = scratch_path.clone();
	let options = SupervisorOptions::default()
		.with_min_processes(2)
		.with_max_processes(2)
		.with_on_child_start(move |_pid| {
			started_cb.fetch_add(1, Ordering::SeqCst);
		})
		.with_on_reload(move |_options| {
			let mut file = fs::OpenOptions::new().append(true).open(&reload_path).unwrap();
			let _ = writeln!(file, "{}", std::process::id());
		});

	let listener = TcpListener::bind("127.0.0.1:0").unwrap();
	let supervisor = Supervisor::with_listener(listener, options);
	let control = supervisor.control();

	let handle = thread::spawn(move || supervisor.start(|_stream, _addr, _handle| {}));
	assert!(wait_for(Duration::from_secs(2), || started.load(Ordering::SeqCst) >= 2));

	let mut new_options = prefork_core::WireOptions::default();
	new_options.min_processes = 2;
	new_options.max_processes = 2;
	control.reload(None, new_options);

	assert!(wait_for(Duration::from_secs(2), || {
		fs::read_to_string(&scratch_path).map(|s| s.lines().count()).unwrap_or(0) >= 2
	}));

	let lines: Vec<String> =
		fs::read_to_string(&scratch_path).unwrap().lines().map(str::to_owned).collect();
	assert_eq!(lines.len(), 2, "on_reload should have fired exactly once per live child");

	control.stop_bang();
	handle.join().unwrap().unwrap();
}
