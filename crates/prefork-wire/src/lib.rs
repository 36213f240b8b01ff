//! Length-prefixed framing for the pipes that connect a supervisor to its
//! workers.
//!
//! A frame is an ASCII decimal byte length, a newline, and exactly that
//! many payload bytes. The payload itself is an opaque, self-describing
//! [`parity_scale_codec`] encoding, so both ends only need to agree on the
//! Rust type being sent, not on a shared schema document.
//!
//! Readers treat a malformed length line or a short payload read as
//! end-of-stream rather than an error: a peer that dies mid-write looks
//! identical to a peer that closed cleanly, and callers are expected to
//! treat both the same way (drop the entry, reap the process).

#![deny(unused_crate_dependencies)]

use parity_scale_codec::{Decode, Encode};
use std::io::{self, BufRead, Write};

/// Upper bound on a single frame's payload, guarding against a corrupted
/// length line turning into an unbounded allocation.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum WireError {
	#[error("io error: {0}")]
	Io(#[from] io::Error),
	#[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
	FrameTooLarge(usize),
	#[error("failed to decode payload: {0}")]
	Decode(#[from] parity_scale_codec::Error),
}

/// Reads one frame. Returns `Ok(None)` on end-of-stream: either the peer
/// closed its write end, or it sent something that doesn't parse as a
/// frame header (which we treat the same way, per the wire contract).
pub fn read_frame<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>, WireError> {
	let mut header = String::new();
	let n = reader.read_line(&mut header)?;
	if n == 0 {
		return Ok(None);
	}
	let Some(digits) = header.strip_suffix('\n') else {
		return Ok(None);
	};
	let Ok(len) = digits.parse::<usize>() else {
		return Ok(None);
	};
	if len > MAX_FRAME_LEN {
		return Err(WireError::FrameTooLarge(len));
	}

	let mut payload = vec![0u8; len];
	if let Err(err) = reader.read_exact(&mut payload) {
		if err.kind() == io::ErrorKind::UnexpectedEof {
			return Ok(None);
		}
		return Err(err.into());
	}
	Ok(Some(payload))
}

/// Writes one frame: the ASCII decimal length, a newline, then the raw
/// payload bytes. Flushes so a single logical message is never left
/// half-buffered in front of the reader.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), WireError> {
	write!(writer, "{}\n", payload.len())?;
	writer.write_all(payload)?;
	writer.flush()?;
	Ok(())
}

/// Encodes `message` and writes it as a single frame.
pub fn send_message<W: Write, T: Encode>(writer: &mut W, message: &T) -> Result<(), WireError> {
	write_frame(writer, &message.encode())
}

/// Reads one frame and decodes it as `T`. `Ok(None)` means end-of-stream,
/// exactly as for [`read_frame`].
pub fn recv_message<R: BufRead, T: Decode>(reader: &mut R) -> Result<Option<T>, WireError> {
	match read_frame(reader)? {
		None => Ok(None),
		Some(bytes) => Ok(Some(T::decode(&mut &bytes[..])?)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	#[derive(Encode, Decode, PartialEq, Eq, Debug, Clone)]
	struct Sample {
		a: u32,
		b: Vec<u8>,
		c: Option<String>,
	}

	#[test]
	fn round_trips_arbitrary_messages() {
		let samples = vec![
			Sample { a: 0, b: vec![], c: None },
			Sample { a: 42, b: vec![1, 2, 3], c: Some("hi".into()) },
			Sample { a: u32::MAX, b: vec![0; 4096], c: Some(String::new()) },
		];
		for sample in samples {
			let mut buf = Vec::new();
			send_message(&mut buf, &sample).unwrap();
			let mut cursor = Cursor::new(buf);
			let decoded: Sample = recv_message(&mut cursor).unwrap().unwrap();
			assert_eq!(decoded, sample);
		}
	}

	#[test]
	fn empty_reader_is_end_of_stream() {
		let mut cursor = Cursor::new(Vec::new());
		let result: Option<Sample> = recv_message(&mut cursor).unwrap();
		assert_eq!(result, None);
	}

	#[test]
	fn malformed_header_is_end_of_stream_not_error() {
		let mut cursor = Cursor::new(b"not-a-number\nsomepayload".to_vec());
		let result = read_frame(&mut cursor).unwrap();
		assert_eq!(result, None);
	}

	#[test]
	fn short_payload_is_end_of_stream_not_error() {
		// Header claims 10 bytes but only 3 are present.
		let mut cursor = Cursor::new(b"10\nabc".to_vec());
		let result = read_frame(&mut cursor).unwrap();
		assert_eq!(result, None);
	}

	#[test]
	fn oversized_frame_is_rejected() {
		let mut cursor = Cursor::new(format!("{}\n", MAX_FRAME_LEN + 1).into_bytes());
		let err = read_frame(&mut cursor).unwrap_err();
		assert!(matches!(err, WireError::FrameTooLarge(_)));
	}

	#[test]
	fn multiple_frames_are_read_in_fifo_order() {
		let mut buf = Vec::new();
		send_message(&mut buf, &1u32).unwrap();
		send_message(&mut buf, &2u32).unwrap();
		send_message(&mut buf, &3u32).unwrap();

		let mut cursor = Cursor::new(buf);
		let mut seen = Vec::new();
		while let Some(v) = recv_message::<_, u32>(&mut cursor).unwrap() {
			seen.push(v);
		}
		assert_eq!(seen, vec![1, 2, 3]);
	}
}
