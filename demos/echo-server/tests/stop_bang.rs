//! Drives the binary from the outside, the way an operator's `kill`
//! would: start it as a real subprocess, confirm it answers connections,
//! send it `SIGTERM`, and confirm it actually exits instead of hanging
//! on a stuck worker.

use assert_cmd::Command;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

fn wait_for<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
	let deadline = Instant::now() + timeout;
	while Instant::now() < deadline {
		if check() {
			return true;
		}
		std::thread::sleep(Duration::from_millis(20));
	}
	check()
}

#[test]
fn sigterm_stops_the_whole_process_tree_promptly() {
	let port = 17_000 + (std::process::id() % 1000) as u16;

	let mut child = Command::cargo_bin("echo-server")
		.unwrap()
		.arg("--port")
		.arg(port.to_string())
		.arg("--min-processes")
		.arg("1")
		.arg("--max-processes")
		.arg("1")
		.spawn()
		.unwrap();

	let connected = wait_for(Duration::from_secs(2), || {
		TcpStream::connect(("127.0.0.1", port)).is_ok()
	});
	assert!(connected, "server never started accepting connections");

	let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
	writeln!(stream, "ping").unwrap();
	let mut reply = String::new();
	BufReader::new(&stream).read_line(&mut reply).unwrap();
	assert_eq!(reply.trim(), "ping");
	drop(stream);

	kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).unwrap();

	let exited = wait_for(Duration::from_secs(5), || {
		matches!(child.try_wait(), Ok(Some(_)))
	});
	assert!(exited, "process did not exit within the shutdown cap after SIGTERM");
}
