//! Newline-delimited transport codec for JSON-RPC messages.
//!
//! Snapcast frames every message as one line of JSON terminated by `\n`
//! (the server sends `\r\n`). Bytes accumulate in the read buffer until a
//! full line is present; a partial line is reported as "incomplete"
//! (`Ok(None)`), never as an error, so callers can keep reading.
//!
//! Frame format:
//! ```text
//! +------------------+------+
//! |  N bytes         |  \n  |
//! |  (JSON payload)  |      |
//! +------------------+------+
//! ```

use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::{Message, Request};

/// Maximum message size (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Codec for newline-delimited JSON-RPC messages
#[derive(Debug, Default)]
pub struct SnapcastCodec {
    /// Bytes already scanned for a newline
    next_index: usize,
}

impl SnapcastCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Outcome of decoding a borrowed buffer with [`decode_frame`]
#[derive(Debug)]
pub enum Decoded {
    /// A full frame was present
    Complete(Message),
    /// More bytes are needed before anything can be decided
    Incomplete,
}

/// Decode the first frame of `bytes` without consuming a stream.
///
/// # Errors
///
/// Returns an error if the first line is not a valid message or the buffer
/// exceeds [`MAX_MESSAGE_SIZE`] without a line terminator.
pub fn decode_frame(bytes: &[u8]) -> Result<Decoded, CodecError> {
    let mut buf = BytesMut::from(bytes);
    match SnapcastCodec::new().decode(&mut buf)? {
        Some(message) => Ok(Decoded::Complete(message)),
        None => Ok(Decoded::Incomplete),
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}

fn parse_line(line: &[u8]) -> Result<Message, CodecError> {
    let json_str = std::str::from_utf8(line)?;
    let message: Message = serde_json::from_str(json_str)?;

    if let Message::Response(resp) = &message
        && !resp.is_well_formed()
    {
        return Err(CodecError::MalformedResponse(resp.id));
    }

    Ok(message)
}

impl Decoder for SnapcastCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let scan_from = self.next_index.min(src.len());
            let Some(offset) = src[scan_from..].iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_MESSAGE_SIZE {
                    return Err(CodecError::MessageTooLarge(src.len()));
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let newline = scan_from + offset;
            self.next_index = 0;

            if newline > MAX_MESSAGE_SIZE {
                return Err(CodecError::MessageTooLarge(newline));
            }

            let frame = src.split_to(newline + 1);
            let line = trim_line(&frame[..newline]);

            // Keep-alive blank lines carry nothing
            if line.is_empty() {
                continue;
            }

            return parse_line(line).map(Some);
        }
    }
}

impl Encoder<Request> for SnapcastCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)?;

        if json.len() > MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(json.len()));
        }

        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');

        Ok(())
    }
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),

    #[error("Response {0} carries neither a result nor an error")]
    MalformedResponse(u64),
}

impl CodecError {
    /// True when the bytes themselves were bad, as opposed to the stream failing
    #[must_use]
    pub fn is_decode_failure(&self) -> bool {
        !matches!(self, CodecError::Io(_))
    }
}


/// Property tests: bytes fed in arbitrary chunks never decode into a
/// response whose fields have the wrong types.
#[cfg(test)]
mod proptest_decode_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{Value, json};

    fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<u32>().prop_map(|n| json!(n)),
            any::<i32>().prop_map(|n| json!(n)),
            (-1e6f64..1e6f64).prop_map(|f| json!(f)),
            "[a-z0-9]{0,8}".prop_map(Value::String),
        ]
    }

    fn arb_error_object() -> impl Strategy<Value = Value> {
        (arb_scalar(), arb_scalar()).prop_map(|(code, message)| {
            json!({"code": code, "message": message})
        })
    }

    prop_compose! {
        /// A response-shaped object whose fields may carry any type, or be missing
        fn arb_response_like()(
            id in proptest::option::of(arb_scalar()),
            result in proptest::option::of(arb_scalar()),
            error in proptest::option::of(prop_oneof![arb_error_object(), arb_scalar()]),
        ) -> Value {
            let mut obj = serde_json::Map::new();
            obj.insert("jsonrpc".to_string(), json!("2.0"));
            if let Some(id) = id {
                obj.insert("id".to_string(), id);
            }
            if let Some(result) = result {
                obj.insert("result".to_string(), result);
            }
            if let Some(error) = error {
                obj.insert("error".to_string(), error);
            }
            Value::Object(obj)
        }
    }

    /// Independent check of what a well-typed response looks like
    fn is_valid_response(value: &Value) -> bool {
        let Some(obj) = value.as_object() else {
            return false;
        };
        if !obj.get("id").is_some_and(Value::is_u64) {
            return false;
        }
        let error_ok = match obj.get("error") {
            None | Some(Value::Null) => None,
            Some(err) => Some(
                err.get("code")
                    .and_then(Value::as_i64)
                    .is_some_and(|c| i32::try_from(c).is_ok())
                    && err.get("message").is_some_and(Value::is_string),
            ),
        };
        match (obj.contains_key("result"), error_ok) {
            (true, None) => true,
            (false, Some(valid)) => valid,
            _ => false,
        }
    }

    fn feed(chunks: &[&[u8]]) -> Vec<Result<Option<Message>, String>> {
        let mut codec = SnapcastCodec::new();
        let mut buf = BytesMut::new();
        let mut outcomes = Vec::new();
        for chunk in chunks {
            buf.extend_from_slice(chunk);
            let outcome = codec.decode(&mut buf).map_err(|e| e.to_string());
            let failed = outcome.is_err();
            outcomes.push(outcome);
            if failed {
                break;
            }
        }
        outcomes
    }

    proptest! {
        #[test]
        fn typed_success_only_for_valid_responses(
            value in arb_response_like(),
            split in 0usize..512,
        ) {
            let mut line = serde_json::to_vec(&value).unwrap();
            line.push(b'\n');
            let split = split.min(line.len() - 1);
            let (head, tail) = line.split_at(split);

            let outcomes = feed(&[head, tail]);

            // Nothing can be decided before the terminator arrives
            prop_assert!(matches!(outcomes[0], Ok(None)));

            let last = outcomes.last().unwrap();
            if is_valid_response(&value) {
                let decoded_response = matches!(last, Ok(Some(Message::Response(_))));
                prop_assert!(decoded_response);
            } else {
                let decoded_response = matches!(last, Ok(Some(Message::Response(_))));
                prop_assert!(!decoded_response);
            }
        }

        #[test]
        fn truncated_frames_stay_incomplete(
            value in arb_response_like(),
            cut in 0usize..512,
        ) {
            let line = serde_json::to_vec(&value).unwrap();
            let cut = cut.min(line.len());
            let outcomes = feed(&[&line[..cut]]);
            prop_assert!(matches!(outcomes[0], Ok(None)));
        }

        #[test]
        fn arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode_frame(&bytes);
        }
    }
}
