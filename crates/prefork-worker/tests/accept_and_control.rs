//! Exercises the accept activity directly (no supervisor, no fork): a
//! worker only needs a listener and a pair of pipes to run, so these
//! scenarios drive it the same way the supervisor's spawned child would.

use prefork_core::{pipe_pair, PipeWriter, StatusMessage, WireOptions, WorkerState};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

fn start_marker_worker(options: WireOptions) -> (SocketAddr, Receiver<StatusMessage>, PipeWriter) {
	let listener = TcpListener::bind("127.0.0.1:0").unwrap();
	let addr = listener.local_addr().unwrap();
	let (mut upstream_reader, upstream_writer) = pipe_pair().unwrap();
	let (downstream_reader, downstream_writer) = pipe_pair().unwrap();
	let (status_tx, status_rx) = mpsc::channel();

	thread::spawn(move || {
		while let Ok(Some(status)) = prefork_wire::recv_message(&mut upstream_reader) {
			if status_tx.send(status).is_err() {
				break;
			}
		}
	});

	thread::spawn(move || {
		let _ = prefork_worker::run(
			vec![listener],
			options,
			upstream_writer,
			downstream_reader,
			None,
			|mut stream, _addr, _handle| {
				let _ = stream.write_all(b"x");
				let mut buf = [0u8; 1];
				let _ = stream.read(&mut buf);
			},
		);
	});

	(addr, status_rx, downstream_writer)
}

fn expect_marker_within(stream: &mut TcpStream, timeout: Duration) -> bool {
	stream.set_read_timeout(Some(timeout)).unwrap();
	let mut buf = [0u8; 1];
	stream.read_exact(&mut buf).is_ok()
}

fn saw_terminal_state_within(status_rx: &Receiver<StatusMessage>, timeout: Duration) -> bool {
	let deadline = std::time::Instant::now() + timeout;
	loop {
		let remaining = deadline.saturating_duration_since(std::time::Instant::now());
		if remaining.is_zero() {
			return false;
		}
		match status_rx.recv_timeout(remaining) {
			Ok(status) if status.state != WorkerState::Run => return true,
			Ok(_) => continue,
			Err(_) => return false,
		}
	}
}

#[test]
fn single_thread_cap_serializes_connections() {
	let mut options = WireOptions::default();
	options.max_threads = 1;
	options.max_idle_millis = 0;
	let (addr, _status, _downstream) = start_marker_worker(options);

	let mut first = TcpStream::connect(addr).unwrap();
	assert!(expect_marker_within(&mut first, Duration::from_millis(500)));

	let mut second = TcpStream::connect(addr).unwrap();
	assert!(!expect_marker_within(&mut second, Duration::from_millis(500)));

	drop(first);
	assert!(expect_marker_within(&mut second, Duration::from_secs(1)));
}

#[test]
fn three_thread_cap_allows_three_concurrent_connections() {
	let mut options = WireOptions::default();
	options.max_threads = 3;
	options.max_idle_millis = 0;
	let (addr, _status, _downstream) = start_marker_worker(options);

	let mut streams: Vec<TcpStream> = (0..3)
		.map(|_| {
			let mut s = TcpStream::connect(addr).unwrap();
			assert!(expect_marker_within(&mut s, Duration::from_millis(500)));
			s
		})
		.collect();

	let mut fourth = TcpStream::connect(addr).unwrap();
	assert!(!expect_marker_within(&mut fourth, Duration::from_millis(500)));

	streams.pop();
	assert!(expect_marker_within(&mut fourth, Duration::from_secs(1)));
}

#[test]
fn max_use_stops_the_worker_after_the_configured_count() {
	let mut options = WireOptions::default();
	options.max_threads = 1;
	options.max_use = 2;
	options.max_idle_millis = 0;
	let (addr, status_rx, _downstream) = start_marker_worker(options);

	for _ in 0..2 {
		let mut stream = TcpStream::connect(addr).unwrap();
		assert!(expect_marker_within(&mut stream, Duration::from_millis(500)));
	}

	assert!(saw_terminal_state_within(&status_rx, Duration::from_millis(500)));
}

#[test]
fn idle_timeout_is_ignored_before_the_first_accept() {
	let mut options = WireOptions::default();
	options.max_threads = 1;
	options.max_idle_millis = 50;
	let (_addr, status_rx, _downstream) = start_marker_worker(options);

	// No connection is ever made. The worker must not exit on idle alone.
	assert!(!saw_terminal_state_within(&status_rx, Duration::from_millis(400)));
}

#[test]
fn idle_timeout_after_first_accept_stops_the_worker() {
	let mut options = WireOptions::default();
	options.max_threads = 1;
	options.max_idle_millis = 100;
	let (addr, status_rx, _downstream) = start_marker_worker(options);

	let mut stream = TcpStream::connect(addr).unwrap();
	assert!(expect_marker_within(&mut stream, Duration::from_millis(500)));
	drop(stream);

	assert!(saw_terminal_state_within(&status_rx, Duration::from_millis(500)));
}
