//! Drives a real `Supervisor` through `start`, forking real worker
//! processes, the way `on_child_start`/`on_child_exit` are meant to be
//! observed in production: from the parent process they already run in.

use prefork_core::SupervisorOptions;
use prefork_supervisor::Supervisor;
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
fn min_processes_with_no_load_spawns_exactly_the_floor() {
	let started = Arc::new(AtomicUsize::new(0));
	let started_cb = Arc::clone(&started);

	let options = SupervisorOptions::default()
		.with_min_processes(3)
		.with_max_processes(10)
		.with_standby_threads(1)
		.with_on_child_start(move |_pid| {
			started_cb.fetch_add(1, Ordering::SeqCst);
		});

	let listener = TcpListener::bind("127.0.0.1:0").unwrap();
	let supervisor = Supervisor::with_listener(listener, options);
	let control = supervisor.control();

	let handle = thread::spawn(move || supervisor.start(|_stream, _addr, _handle| {}));

	assert!(wait_for(Duration::from_secs(2), || started.load(Ordering::SeqCst) >= 3));

	control.stop_bang();
	handle.join().unwrap().unwrap();
}

#[test]
fn standby_threads_sizes_the_population_by_max_threads() {
	let started = Arc::new(AtomicUsize::new(0));
	let started_cb = Arc::clone(&started);

	let options = SupervisorOptions::default()
		.with_min_processes(1)
		.with_max_processes(20)
		.with_max_threads(2)
		.with_standby_threads(10)
		.with_on_child_start(move |_pid| {
			started_cb.fetch_add(1, Ordering::SeqCst);
		});

	let listener = TcpListener::bind("127.0.0.1:0").unwrap();
	let supervisor = Supervisor::with_listener(listener, options);
	let control = supervisor.control();

	let handle = thread::spawn(move || supervisor.start(|_stream, _addr, _handle| {}));

	// ceil(10 / 2) = 5.
	assert!(wait_for(Duration::from_secs(2), || started.load(Ordering::SeqCst) >= 5));

	control.stop_bang();
	handle.join().unwrap().unwrap();
}

#[test]
fn on_child_exit_reports_a_clean_exit_status() {
	let exited = Arc::new(AtomicUsize::new(0));
	let exited_cb = Arc::clone(&exited);
	let clean = Arc::new(AtomicUsize::new(0));
	let clean_cb = Arc::clone(&clean);

	let options = SupervisorOptions::default()
		.with_min_processes(1)
		.with_max_processes(1)
		.with_max_idle(Some(Duration::from_millis(200)))
		.with_on_child_exit(move |_pid, status| {
			exited_cb.fetch_add(1, Ordering::SeqCst);
			if status.success() {
				clean_cb.fetch_add(1, Ordering::SeqCst);
			}
		});

	let listener = TcpListener::bind("127.0.0.1:0").unwrap();
	let supervisor = Supervisor::with_listener(listener, options);
	let control = supervisor.control();

	let handle = thread::spawn(move || supervisor.start(|_stream, _addr, _handle| {}));

	assert!(control.detach_children());
	assert!(wait_for(Duration::from_secs(2), || exited.load(Ordering::SeqCst) >= 1));
	assert_eq!(clean.load(Ordering::SeqCst), exited.load(Ordering::SeqCst));

	control.stop();
	handle.join().unwrap().unwrap();
}
