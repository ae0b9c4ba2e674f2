//! Per-connection message framing.
//!
//! Inbound bytes are decoded as UTF-8 (invalid sequences are dropped) and
//! accumulated until a `#%` terminator shows up. Messages that start with a
//! cipher marker have their first field run through [`cipher::decrypt`].

use tracing::debug;

use crate::cipher;
use crate::error::FramingError;
use crate::{FIELD_DELIMITER, MESSAGE_DELIMITER};

/// Maximum number of buffered characters before the peer is dropped.
pub const MAX_BUFFER_LEN: usize = 8192;

/// Leading characters that mark a message whose head is encrypted.
const CIPHER_MARKERS: [char; 3] = ['#', '3', '4'];

/// Unterminated handshake sent by one old client build. Treated as a
/// complete message when it is all that is left in the buffer.
pub const UNTERMINATED_ASKCHAR2: &str = "#615810BC07D12A5A#";

/// Splits a byte stream into protocol messages.
#[derive(Debug)]
pub struct Framer {
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence from the last read.
    pending: Vec<u8>,
    max_len: usize,
}

impl Framer {
    pub fn new() -> Self {
        Self::with_limit(MAX_BUFFER_LEN)
    }

    pub fn with_limit(max_len: usize) -> Self {
        Self {
            buffer: String::new(),
            pending: Vec::new(),
            max_len,
        }
    }

    /// Append raw bytes read from the peer.
    ///
    /// Fails once the buffered text grows past the limit; the caller must
    /// drop the connection.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), FramingError> {
        self.decode_lossy(data);
        if self.buffer.chars().count() > self.max_len {
            return Err(FramingError::BufferOverflow {
                limit: self.max_len,
            });
        }
        Ok(())
    }

    /// Pop the next complete message, already decrypted if it carried a
    /// cipher marker.
    ///
    /// A message shorter than 2 characters is a framing error; the caller
    /// must stop reading and drop the connection.
    pub fn next_message(&mut self) -> Option<Result<String, FramingError>> {
        let raw = if let Some(idx) = self.buffer.find(MESSAGE_DELIMITER) {
            let raw = self.buffer[..idx].to_string();
            self.buffer.drain(..idx + MESSAGE_DELIMITER.len());
            raw
        } else if self.buffer == UNTERMINATED_ASKCHAR2 {
            std::mem::take(&mut self.buffer)
        } else {
            return None;
        };

        if raw.chars().count() < 2 {
            return Some(Err(FramingError::ShortMessage(raw)));
        }
        Some(Ok(unwrap_legacy(raw)))
    }

    /// Number of characters waiting for a terminator.
    pub fn buffered_len(&self) -> usize {
        self.buffer.chars().count()
    }

    fn decode_lossy(&mut self, data: &[u8]) {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(data);

        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    self.buffer.push_str(s);
                    return;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    if let Ok(s) = std::str::from_utf8(valid) {
                        self.buffer.push_str(s);
                    }
                    match e.error_len() {
                        Some(bad) => rest = &after[bad..],
                        None => {
                            // Sequence cut off by the read boundary.
                            self.pending = after.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrypt the head of a message that starts with a cipher marker. Other
/// messages are returned unchanged.
pub fn unwrap_legacy(msg: String) -> String {
    let Some(first) = msg.chars().next() else {
        return msg;
    };
    if !CIPHER_MARKERS.contains(&first) {
        return msg;
    }

    let body = msg.strip_prefix('#').unwrap_or(msg.as_str());
    let plain = match body.split_once(FIELD_DELIMITER) {
        Some((head, tail)) => format!("{}{FIELD_DELIMITER}{tail}", cipher::decrypt(head)),
        None => cipher::decrypt(body),
    };
    debug!("[INC][RAW]{plain}");
    plain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(framer: &mut Framer) -> Vec<Result<String, FramingError>> {
        std::iter::from_fn(|| framer.next_message()).collect()
    }

    #[test]
    fn splits_on_terminator() {
        let mut framer = Framer::new();
        framer.feed(b"HI#abc123#%CH#%RC#").unwrap();
        assert_eq!(
            drain(&mut framer),
            vec![Ok("HI#abc123".to_string()), Ok("CH".to_string())]
        );
        assert_eq!(framer.buffered_len(), 3);

        framer.feed(b"%").unwrap();
        assert_eq!(drain(&mut framer), vec![Ok("RC".to_string())]);
    }

    #[test]
    fn terminator_split_across_reads() {
        let mut framer = Framer::new();
        framer.feed(b"CH#").unwrap();
        assert!(framer.next_message().is_none());
        framer.feed(b"%").unwrap();
        assert_eq!(framer.next_message(), Some(Ok("CH".to_string())));
    }

    #[test]
    fn short_message_is_a_framing_error() {
        let mut framer = Framer::new();
        framer.feed(b"X#%HI#a#%").unwrap();
        assert_eq!(
            framer.next_message(),
            Some(Err(FramingError::ShortMessage("X".into())))
        );
    }

    #[test]
    fn empty_message_is_a_framing_error() {
        let mut framer = Framer::new();
        framer.feed(b"#%").unwrap();
        assert!(matches!(
            framer.next_message(),
            Some(Err(FramingError::ShortMessage(_)))
        ));
    }

    #[test]
    fn overflow_past_limit() {
        let mut framer = Framer::new();
        assert!(framer.feed(&[b'a'; MAX_BUFFER_LEN]).is_ok());
        assert_eq!(
            framer.feed(b"a"),
            Err(FramingError::BufferOverflow {
                limit: MAX_BUFFER_LEN
            })
        );
    }

    #[test]
    fn unterminated_askchar2_is_emitted_and_decrypted() {
        let mut framer = Framer::new();
        framer.feed(UNTERMINATED_ASKCHAR2.as_bytes()).unwrap();
        assert_eq!(framer.next_message(), Some(Ok("askchar2#".to_string())));
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn askchar2_prefix_is_not_special() {
        let mut framer = Framer::new();
        framer.feed(b"#615810BC07D12A5A#x").unwrap();
        assert!(framer.next_message().is_none());
    }

    #[test]
    fn encrypted_head_with_plain_tail() {
        let mut framer = Framer::new();
        let wire = format!("#{}#abc123#%", cipher::encrypt("HI"));
        framer.feed(wire.as_bytes()).unwrap();
        assert_eq!(framer.next_message(), Some(Ok("HI#abc123".to_string())));
    }

    #[test]
    fn encrypted_printable_ascii_roundtrip() {
        let plain: String = (0x20u8..0x7F).map(char::from).collect();
        let mut framer = Framer::new();
        let wire = format!("#{}#%", cipher::encrypt(&plain));
        framer.feed(wire.as_bytes()).unwrap();
        assert_eq!(framer.next_message(), Some(Ok(plain)));
    }

    #[test]
    fn invalid_utf8_is_dropped() {
        let mut framer = Framer::new();
        framer.feed(b"C\xFF\xFEH#%").unwrap();
        assert_eq!(framer.next_message(), Some(Ok("CH".to_string())));
    }

    #[test]
    fn multibyte_char_split_across_reads() {
        let mut framer = Framer::new();
        let bytes = "CT#n#é#%".as_bytes();
        let cut = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;
        framer.feed(&bytes[..cut]).unwrap();
        framer.feed(&bytes[cut..]).unwrap();
        assert_eq!(framer.next_message(), Some(Ok("CT#n#é".to_string())));
    }

    #[test]
    fn plain_messages_pass_through() {
        assert_eq!(unwrap_legacy("MS#chat".into()), "MS#chat");
    }
}
