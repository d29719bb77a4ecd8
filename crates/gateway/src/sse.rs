//! The SSE wire format shared by the legacy SSE+POST transport, the
//! streamable-HTTP SSE upgrade, and the upstream client's stream consumer
//! (spec §6 "SSE event format"): `event: message`, `id: <monotonic>`,
//! `data: <one JSON frame>`, blank-line delimited; `:`-prefixed comment
//! lines serve as keep-alives.

use bytes::BytesMut;

#[derive(Debug, Clone)]
pub struct SseEvent {
	pub id: Option<u64>,
	pub event: Option<String>,
	pub data: String,
}

/// Incrementally parses a byte stream into complete SSE events, buffering
/// partial frames across chunk boundaries. Feed chunks via [`Self::push`],
/// drain completed events via [`Self::pop_event`].
#[derive(Default)]
pub struct SseDecoder {
	buf: BytesMut,
	id: Option<u64>,
	event: Option<String>,
	data: Vec<String>,
}

impl SseDecoder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, chunk: &[u8]) {
		self.buf.extend_from_slice(chunk);
	}

	/// Pops the next complete event, if any full line-delimited block is
	/// buffered. Returns `None` when more bytes are needed.
	pub fn pop_event(&mut self) -> Option<SseEvent> {
		loop {
			let Some(nl) = self.buf.iter().position(|&b| b == b'\n') else {
				return None;
			};
			let line = self.buf.split_to(nl + 1);
			let line = &line[..line.len() - 1];
			let line = String::from_utf8_lossy(line);
			let line = line.trim_end_matches('\r');

			if line.is_empty() {
				if self.data.is_empty() && self.event.is_none() {
					continue; // stray blank line, e.g. after a keep-alive comment
				}
				let event = SseEvent {
					id: self.id.take(),
					event: self.event.take(),
					data: self.data.join("\n"),
				};
				self.data.clear();
				return Some(event);
			}
			if let Some(rest) = line.strip_prefix(':') {
				let _ = rest; // comment/keep-alive line, ignored
				continue;
			}
			if let Some(rest) = line.strip_prefix("id:") {
				self.id = rest.trim().parse().ok();
			} else if let Some(rest) = line.strip_prefix("event:") {
				self.event = Some(rest.trim().to_string());
			} else if let Some(rest) = line.strip_prefix("data:") {
				self.data.push(rest.trim_start().to_string());
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_id_event_and_data_lines() {
		let wire = "id: 7\nevent: message\ndata: {\"hello\":true}\n\n";
		let mut dec = SseDecoder::new();
		dec.push(wire.as_bytes());
		let parsed = dec.pop_event().expect("event parsed");
		assert_eq!(parsed.id, Some(7));
		assert_eq!(parsed.data, "{\"hello\":true}");
	}

	#[test]
	fn handles_chunked_partial_frames() {
		let wire = "id: 1\nevent: message\ndata: partial-then-rest\n\n";
		let mut dec = SseDecoder::new();
		let (first, second) = wire.split_at(10);
		dec.push(first.as_bytes());
		assert!(dec.pop_event().is_none());
		dec.push(second.as_bytes());
		let parsed = dec.pop_event().unwrap();
		assert_eq!(parsed.data, "partial-then-rest");
	}

	#[test]
	fn ignores_comment_keepalive_lines() {
		let mut dec = SseDecoder::new();
		dec.push(b": keep-alive\n\n");
		dec.push(b"data: x\n\n");
		let parsed = dec.pop_event().unwrap();
		assert_eq!(parsed.data, "x");
	}

	#[test]
	fn multiline_data_is_joined_with_newlines() {
		let wire = "data: line1\ndata: line2\n\n";
		let mut dec = SseDecoder::new();
		dec.push(wire.as_bytes());
		let parsed = dec.pop_event().unwrap();
		assert_eq!(parsed.data, "line1\nline2");
	}
}
