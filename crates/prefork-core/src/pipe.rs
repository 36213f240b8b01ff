//! Unnamed pipes used for the parent/worker control channel.
//!
//! Pipes are created `O_CLOEXEC` so that forking a sibling worker never
//! leaks this worker's pipe ends into it — the supervisor is responsible
//! for closing the *parent*-side duplicates itself (see
//! `prefork-supervisor`'s spawn routine), but the worker side never needs
//! to think about siblings at all once `O_CLOEXEC` is set at creation.

use crate::error::CoreError;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::pipe2;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// The read end of a control pipe, buffered so [`prefork_wire`] can read
/// a length line followed by an exact payload.
pub struct PipeReader {
	inner: BufReader<File>,
}

impl PipeReader {
	fn from_owned(fd: OwnedFd) -> Self {
		Self { inner: BufReader::new(File::from(fd)) }
	}
}

impl Read for PipeReader {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		self.inner.read(buf)
	}
}

impl BufRead for PipeReader {
	fn fill_buf(&mut self) -> io::Result<&[u8]> {
		self.inner.fill_buf()
	}
	fn consume(&mut self, amt: usize) {
		self.inner.consume(amt)
	}
}

impl AsRawFd for PipeReader {
	fn as_raw_fd(&self) -> RawFd {
		self.inner.get_ref().as_raw_fd()
	}
}

impl AsFd for PipeReader {
	fn as_fd(&self) -> BorrowedFd<'_> {
		self.inner.get_ref().as_fd()
	}
}

/// The write end of a control pipe.
pub struct PipeWriter {
	inner: File,
}

impl PipeWriter {
	fn from_owned(fd: OwnedFd) -> Self {
		Self { inner: File::from(fd) }
	}
}

impl Write for PipeWriter {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.inner.write(buf)
	}
	fn flush(&mut self) -> io::Result<()> {
		self.inner.flush()
	}
}

impl AsRawFd for PipeWriter {
	fn as_raw_fd(&self) -> RawFd {
		self.inner.as_raw_fd()
	}
}

impl AsFd for PipeWriter {
	fn as_fd(&self) -> BorrowedFd<'_> {
		self.inner.as_fd()
	}
}

/// Creates a close-on-exec pipe pair: `(reader, writer)`.
pub fn pipe_pair() -> Result<(PipeReader, PipeWriter), CoreError> {
	let (read_fd, write_fd) = pipe2(OFlag::O_CLOEXEC)?;
	let read_fd = unsafe { OwnedFd::from_raw_fd(read_fd) };
	let write_fd = unsafe { OwnedFd::from_raw_fd(write_fd) };
	Ok((PipeReader::from_owned(read_fd), PipeWriter::from_owned(write_fd)))
}

/// Sets `O_NONBLOCK` on any fd-backed object, used for both the listener
/// (the worker must not block forever in `accept`) and, in tests, for
/// probing a writer without risking a deadlock against a stalled peer.
pub fn set_nonblocking<F: AsRawFd>(fd: &F) -> Result<(), CoreError> {
	let raw = fd.as_raw_fd();
	let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
	fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bytes_written_to_one_end_are_read_back_on_the_other() {
		let (mut reader, mut writer) = pipe_pair().unwrap();
		writer.write_all(b"hello").unwrap();
		drop(writer);
		let mut buf = String::new();
		io::Read::read_to_string(&mut reader, &mut buf).unwrap();
		assert_eq!(buf, "hello");
	}

	#[test]
	fn set_nonblocking_makes_an_empty_pipe_read_return_would_block() {
		let (mut reader, writer) = pipe_pair().unwrap();
		set_nonblocking(&reader).unwrap();
		let mut buf = [0u8; 1];
		let err = reader.read(&mut buf).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
		drop(writer);
	}
}
