//! A minimal TCP echo server: one line in, the same line back out.
//! Demonstrates wiring a handler into `prefork-supervisor`.

use clap::Parser;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use prefork_core::SupervisorOptions;
use prefork_supervisor::Supervisor;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

static TERM_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigterm(_: i32) {
	TERM_REQUESTED.store(true, Ordering::SeqCst);
}

#[derive(Parser)]
#[command(about = "A prefork TCP echo server")]
struct Args {
	#[arg(long, default_value = "127.0.0.1")]
	host: String,
	#[arg(long, default_value_t = 7890)]
	port: u16,
	#[arg(long, default_value_t = 5)]
	min_processes: u32,
	#[arg(long, default_value_t = 20)]
	max_processes: u32,
	#[arg(long, default_value_t = 4)]
	max_threads: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	prefork_core::init_tracing();
	let args = Args::parse();

	let options = SupervisorOptions::default()
		.with_min_processes(args.min_processes)
		.with_max_processes(args.max_processes)
		.with_max_threads(args.max_threads)
		.with_on_child_start(|pid| tracing::info!(pid, "worker started"))
		.with_on_child_exit(|pid, status| tracing::info!(pid, ?status, "worker exited"));

	let supervisor = Supervisor::bind((args.host.as_str(), args.port), options)?;
	tracing::info!(host = %args.host, port = args.port, "listening");

	// SAFETY: `on_sigterm` only touches an `AtomicBool`, which is
	// async-signal-safe.
	unsafe {
		sigaction(
			Signal::SIGTERM,
			&SigAction::new(SigHandler::Handler(on_sigterm), SaFlags::empty(), SigSet::empty()),
		)?;
	}

	let control = supervisor.control();
	thread::spawn(move || loop {
		if TERM_REQUESTED.load(Ordering::SeqCst) {
			tracing::info!("SIGTERM received, stopping forcefully");
			control.stop_bang();
			break;
		}
		thread::sleep(Duration::from_millis(50));
	});

	supervisor.start(|stream, addr, _handle| {
		if let Err(err) = echo(stream) {
			tracing::debug!(%addr, %err, "connection ended with an error");
		}
	})?;
	Ok(())
}

fn echo(stream: TcpStream) -> std::io::Result<()> {
	let mut writer = stream.try_clone()?;
	let reader = BufReader::new(stream);
	for line in reader.lines() {
		let line = line?;
		writeln!(writer, "{line}")?;
	}
	Ok(())
}
