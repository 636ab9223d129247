//! Incremental splitter for the CR LF delimited user stream.
//!
//! Bytes arrive in arbitrary network chunks. [`FrameDecoder`] keeps the
//! partial tail between calls and yields complete frames lazily.

use bytes::{Buf, BytesMut};

use crate::stream::event::Record;

/// Wire delimiter between frames.
pub const FRAME_DELIMITER: &[u8] = b"\r\n";

/// One unit decoded from the stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Keep-alive transmission with no payload.
    Heartbeat,
    /// Any JSON object, whatever the shape of its fields.
    Record(Box<Record>),
    /// Payload that could not be decoded, lossily converted to text.
    Garbage(String),
}

/// Framing behaviour of a [`FrameDecoder`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FramingMode {
    /// Every complete frame is emitted no matter how the bytes were chunked,
    /// and garbage frames carry the payload that failed to decode.
    #[default]
    Standard,
    /// Compatible with the first-generation clients: the buffer is
    /// discarded after every non-empty payload, garbage frames carry the
    /// bytes left after the failed payload, and heartbeats are not consumed.
    Legacy,
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    mode: FramingMode,
}

impl FrameDecoder {
    pub fn new(mode: FramingMode) -> Self {
        Self {
            buffer: BytesMut::new(),
            mode,
        }
    }

    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Bytes received but not yet consumed as a frame.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Appends `bytes` and returns the frames that are now complete.
    ///
    /// A buffer holding exactly the delimiter is a heartbeat and is reported
    /// before any splitting happens.
    pub fn feed(&mut self, bytes: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(bytes);

        let heartbeat = self.buffer.as_ref() == FRAME_DELIMITER;
        if heartbeat && self.mode == FramingMode::Standard {
            self.buffer.clear();
        }

        Frames {
            decoder: self,
            heartbeat,
            done: false,
        }
    }
}

/// Lazy iterator over the frames completed by one [`FrameDecoder::feed`].
///
/// Frames left unread when the iterator is dropped stay buffered.
#[derive(Debug)]
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
    heartbeat: bool,
    done: bool,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.done {
            return None;
        }
        let mode = self.decoder.mode;

        if self.heartbeat {
            self.heartbeat = false;
            // Legacy framing leaves the delimiter buffered and skips splitting.
            self.done = mode == FramingMode::Legacy;
            return Some(Frame::Heartbeat);
        }

        let buffer = &mut self.decoder.buffer;
        loop {
            let index = find_delimiter(buffer)?;
            let payload = buffer.split_to(index);
            buffer.advance(FRAME_DELIMITER.len());
            if payload.is_empty() {
                continue;
            }

            let frame = match serde_json::from_slice::<Record>(&payload) {
                Ok(record) => Frame::Record(Box::new(record)),
                Err(_) => match mode {
                    FramingMode::Standard => Frame::Garbage(lossy(&payload)),
                    FramingMode::Legacy => Frame::Garbage(lossy(buffer)),
                },
            };
            if mode == FramingMode::Legacy {
                buffer.clear();
            }
            return Some(frame);
        }
    }
}

fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::{Frame, FrameDecoder, FramingMode};

    const REPLY: &str = r#"{"event":"message.create","source":{"id":"42"},"object":{"text":"hi","in_reply_to_user_id":"7"}}"#;
    const FAV: &str = r#"{"event":"fav.create","object":{"user":{"id":"7"}}}"#;

    fn decode_all(decoder: &mut FrameDecoder, chunks: &[&[u8]]) -> Vec<Frame> {
        chunks
            .iter()
            .flat_map(|chunk| decoder.feed(chunk).collect::<Vec<_>>())
            .collect()
    }

    fn event_of(frame: &Frame) -> Option<&str> {
        match frame {
            Frame::Record(record) => record.event.as_deref(),
            _ => None,
        }
    }

    #[test]
    fn lone_delimiter_is_heartbeat() {
        for mode in [FramingMode::Standard, FramingMode::Legacy] {
            let mut decoder = FrameDecoder::new(mode);
            let frames: Vec<_> = decoder.feed(b"\r\n").collect();
            assert_eq!(frames, vec![Frame::Heartbeat]);
        }
    }

    #[test]
    fn heartbeat_split_across_chunks_is_reassembled() {
        let mut decoder = FrameDecoder::new(FramingMode::Standard);
        assert_eq!(decoder.feed(b"\r").count(), 0);
        let frames: Vec<_> = decoder.feed(b"\n").collect();
        assert_eq!(frames, vec![Frame::Heartbeat]);
        assert!(decoder.buffered().is_empty());
    }

    #[test]
    fn record_frame_is_decoded() {
        let mut decoder = FrameDecoder::new(FramingMode::Standard);
        let input = format!("{REPLY}\r\n");
        let frames: Vec<_> = decoder.feed(input.as_bytes()).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(event_of(&frames[0]), Some("message.create"));
        assert!(decoder.buffered().is_empty());
    }

    #[test]
    fn empty_payload_between_delimiters_is_skipped() {
        let mut decoder = FrameDecoder::new(FramingMode::Standard);
        let input = format!("{REPLY}\r\n\r\n{FAV}\r\n");
        let frames: Vec<_> = decoder.feed(input.as_bytes()).collect();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|frame| matches!(frame, Frame::Record(_))));
    }

    #[test]
    fn partial_frame_waits_for_delimiter() {
        let mut decoder = FrameDecoder::new(FramingMode::Standard);
        let (head, tail) = REPLY.split_at(20);
        assert_eq!(decoder.feed(head.as_bytes()).count(), 0);
        assert_eq!(decoder.buffered(), head.as_bytes());
        let rest = format!("{tail}\r");
        assert_eq!(decoder.feed(rest.as_bytes()).count(), 0);
        let frames: Vec<_> = decoder.feed(b"\n").collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(event_of(&frames[0]), Some("message.create"));
    }

    #[test]
    fn standard_framing_is_fragmentation_transparent() {
        let input = format!("{REPLY}\r\nnot-json\r\n{FAV}\r\n{REPLY}\r\n");
        let bytes = input.as_bytes();

        let mut whole = FrameDecoder::new(FramingMode::Standard);
        let expected: Vec<_> = whole.feed(bytes).collect();
        assert_eq!(expected.len(), 4);

        for chunk_len in 1..=bytes.len() {
            let mut decoder = FrameDecoder::new(FramingMode::Standard);
            let chunks: Vec<&[u8]> = bytes.chunks(chunk_len).collect();
            let frames = decode_all(&mut decoder, &chunks);
            assert_eq!(frames, expected, "chunk length {chunk_len}");
            assert!(decoder.buffered().is_empty());
        }
    }

    #[test]
    fn standard_garbage_carries_failed_payload() {
        let mut decoder = FrameDecoder::new(FramingMode::Standard);
        let input = format!("not-json\r\n{FAV}\r\n");
        let frames: Vec<_> = decoder.feed(input.as_bytes()).collect();
        assert_eq!(frames[0], Frame::Garbage("not-json".to_string()));
        assert_eq!(event_of(&frames[1]), Some("fav.create"));
    }

    #[test]
    fn garbage_clears_buffer() {
        for mode in [FramingMode::Standard, FramingMode::Legacy] {
            let mut decoder = FrameDecoder::new(mode);
            let frames: Vec<_> = decoder.feed(b"not-json\r\n").collect();
            assert_eq!(frames.len(), 1);
            assert!(matches!(frames[0], Frame::Garbage(_)));
            assert!(decoder.buffered().is_empty());
        }
    }

    #[test]
    fn legacy_garbage_carries_residual_buffer() {
        let mut decoder = FrameDecoder::new(FramingMode::Legacy);
        let frames: Vec<_> = decoder.feed(b"not-json\r\n{\"event\":").collect();
        assert_eq!(frames, vec![Frame::Garbage("{\"event\":".to_string())]);
        assert!(decoder.buffered().is_empty());
    }

    #[test]
    fn legacy_drops_frames_queued_in_same_chunk() {
        let mut decoder = FrameDecoder::new(FramingMode::Legacy);
        let input = format!("{REPLY}\r\n{FAV}\r\n");
        let frames: Vec<_> = decoder.feed(input.as_bytes()).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(event_of(&frames[0]), Some("message.create"));
        assert!(decoder.buffered().is_empty());
    }

    #[test]
    fn legacy_heartbeat_stays_buffered() {
        let mut decoder = FrameDecoder::new(FramingMode::Legacy);
        assert_eq!(decoder.feed(b"\r\n").count(), 1);
        assert_eq!(decoder.buffered(), b"\r\n");

        // A second heartbeat is swallowed as an empty payload.
        assert_eq!(decoder.feed(b"\r\n").count(), 0);
        assert!(decoder.buffered().is_empty());

        let input = format!("{FAV}\r\n");
        let frames: Vec<_> = decoder.feed(input.as_bytes()).collect();
        assert_eq!(event_of(&frames[0]), Some("fav.create"));
    }

    #[test]
    fn delimiter_inside_data_chunk_is_not_heartbeat() {
        let mut decoder = FrameDecoder::new(FramingMode::Standard);
        let input = format!("\r\n{FAV}\r\n");
        let frames: Vec<_> = decoder.feed(input.as_bytes()).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(event_of(&frames[0]), Some("fav.create"));
    }

    #[test]
    fn loosely_typed_objects_are_records() {
        let mut decoder = FrameDecoder::new(FramingMode::Standard);
        let input = concat!(
            r#"{"event":"message.create","source":{"id":42},"object":{"text":"hi","in_reply_to_user_id":7}}"#,
            "\r\n",
            r#"{"event":"list.subscribe","object":[1,2]}"#,
            "\r\n",
            r#"{"event":"user.updateprofile","object":{"id":123}}"#,
            "\r\n",
        );
        let frames: Vec<_> = decoder.feed(input.as_bytes()).collect();
        let events: Vec<_> = frames.iter().map(event_of).collect();
        assert_eq!(
            events,
            vec![
                Some("message.create"),
                Some("list.subscribe"),
                Some("user.updateprofile")
            ]
        );
    }

    #[test]
    fn non_object_json_is_garbage() {
        let mut decoder = FrameDecoder::new(FramingMode::Standard);
        let frames: Vec<_> = decoder.feed(b"[1,2]\r\n").collect();
        assert_eq!(frames, vec![Frame::Garbage("[1,2]".to_string())]);
    }

    #[test]
    fn invalid_utf8_is_garbage() {
        let mut decoder = FrameDecoder::new(FramingMode::Standard);
        let frames: Vec<_> = decoder.feed(b"\xff\xfe\r\n").collect();
        assert!(matches!(&frames[0], Frame::Garbage(text) if !text.is_empty()));
    }
}
