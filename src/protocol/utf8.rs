//! Incremental UTF-8 validation for text messages.
//!
//! Message payloads arrive in frame-sized (and read-sized) pieces, so a
//! multi-byte sequence can straddle a boundary. The validator keeps the
//! trailing incomplete bytes between calls and rejects input as soon as a
//! sequence is known to be invalid.

use crate::error::{Error, Result};

/// Streaming UTF-8 validator.
#[derive(Debug, Default)]
pub struct Utf8Validator {
    incomplete: [u8; 4],
    incomplete_len: usize,
}

impl Utf8Validator {
    /// New validator with no pending bytes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the next chunk of message payload.
    ///
    /// An incomplete multi-byte sequence at the end of the chunk is carried
    /// into the next call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUtf8`] on the first definitively invalid byte.
    pub fn feed(&mut self, data: &[u8]) -> Result<()> {
        if self.incomplete_len == 0 {
            return self.check(data);
        }

        // A carried sequence needs at most 3 more bytes to complete.
        let carried = self.incomplete_len;
        let take = data.len().min(4 - carried);
        let mut joined = [0u8; 4];
        joined[..carried].copy_from_slice(&self.incomplete[..carried]);
        joined[carried..carried + take].copy_from_slice(&data[..take]);
        let joined_len = carried + take;
        self.incomplete_len = 0;

        match std::str::from_utf8(&joined[..joined_len]) {
            Ok(_) => self.check(&data[take..]),
            Err(e) if e.error_len().is_some() => Err(Error::InvalidUtf8),
            Err(e) => {
                let valid = e.valid_up_to();
                if valid == 0 {
                    // Sequence still incomplete; the chunk was shorter than
                    // the bytes needed to finish it.
                    debug_assert_eq!(take, data.len());
                    self.incomplete[..joined_len].copy_from_slice(&joined[..joined_len]);
                    self.incomplete_len = joined_len;
                    Ok(())
                } else {
                    // Carried sequence completed at `valid`; revalidate from
                    // the matching position in `data`.
                    self.check(&data[valid - carried..])
                }
            }
        }
    }

    /// Assert that the message ended on a complete sequence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUtf8`] if bytes of an unfinished sequence are
    /// still pending.
    pub fn finish(&mut self) -> Result<()> {
        if self.incomplete_len != 0 {
            self.incomplete_len = 0;
            return Err(Error::InvalidUtf8);
        }
        Ok(())
    }

    /// Reset to the initial state, dropping any pending bytes.
    pub fn reset(&mut self) {
        self.incomplete_len = 0;
    }

    fn check(&mut self, data: &[u8]) -> Result<()> {
        match std::str::from_utf8(data) {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.error_len().is_some() {
                    return Err(Error::InvalidUtf8);
                }
                let tail = &data[e.valid_up_to()..];
                debug_assert!(tail.len() < 4);
                self.incomplete[..tail.len()].copy_from_slice(tail);
                self.incomplete_len = tail.len();
                Ok(())
            }
        }
    }
}
