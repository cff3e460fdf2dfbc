//! Buffered character reader with look-ahead, pushback and position tracking.
//!
//! Input is pulled from the underlying [`Read`] in fixed-size chunks and
//! decoded as UTF-8 incrementally, so multi-byte sequences and markers may
//! straddle chunk boundaries. Every recognized line terminator (`\n`,
//! `\r\n`, `\r`) advances the line counter exactly once.

use std::collections::VecDeque;
use std::io::{self, Read};

use crate::{Location, ParseError};

const CHUNK_SIZE: usize = 8 * 1024;

/// Maximum number of characters that can be pushed back with exact
/// position restoration.
pub const PUSHBACK_LIMIT: usize = 256;

pub struct CharReader<R> {
    inner: R,
    lookahead: VecDeque<char>,
    pending_bytes: Vec<u8>,
    exhausted: bool,
    location: Location,
    after_cr: bool,
    history: VecDeque<(Location, bool)>,
}

impl<R: Read> CharReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            lookahead: VecDeque::new(),
            pending_bytes: Vec::new(),
            exhausted: false,
            location: Location::start(),
            after_cr: false,
            history: VecDeque::with_capacity(PUSHBACK_LIMIT),
        }
    }

    /// Position of the next character to be read.
    pub fn location(&self) -> Location {
        self.location
    }

    /// Consume and return the next character, or `None` at end of input.
    pub fn read(&mut self) -> Result<Option<char>, ParseError> {
        self.fill(1)?;
        let Some(ch) = self.lookahead.pop_front() else {
            return Ok(None);
        };
        self.history.push_back((self.location, self.after_cr));
        if self.history.len() > PUSHBACK_LIMIT {
            self.history.pop_front();
        }
        self.advance(ch);
        Ok(Some(ch))
    }

    /// Look at the character `n` positions ahead without consuming anything.
    pub fn peek(&mut self, n: usize) -> Result<Option<char>, ParseError> {
        self.fill(n + 1)?;
        Ok(self.lookahead.get(n).copied())
    }

    /// Re-inject already consumed text so it is read again.
    ///
    /// Positions are restored for up to [`PUSHBACK_LIMIT`] characters.
    pub fn pushback(&mut self, text: &str) {
        for ch in text.chars().rev() {
            self.lookahead.push_front(ch);
            if let Some((location, after_cr)) = self.history.pop_back() {
                self.location = location;
                self.after_cr = after_cr;
            }
        }
    }

    /// Check whether the upcoming characters equal `pattern`.
    pub fn looking_at(&mut self, pattern: &str) -> Result<bool, ParseError> {
        self.matches_ahead(pattern, |a, b| a == b)
    }

    /// Like [`looking_at`](Self::looking_at), ignoring ASCII case.
    pub fn looking_at_ignore_case(&mut self, pattern: &str) -> Result<bool, ParseError> {
        self.matches_ahead(pattern, |a, b| a.eq_ignore_ascii_case(&b))
    }

    /// Consume `n` characters.
    pub fn skip(&mut self, n: usize) -> Result<(), ParseError> {
        for _ in 0..n {
            self.read()?;
        }
        Ok(())
    }

    /// Consume characters up to and including the first occurrence of
    /// `marker`, returning the text before it. Returns `None` when input ends
    /// before the marker shows up.
    pub fn read_until(&mut self, marker: &str) -> Result<Option<String>, ParseError> {
        let marker_len = marker.chars().count();
        let mut text = String::new();
        loop {
            if self.looking_at(marker)? {
                self.skip(marker_len)?;
                return Ok(Some(text));
            }
            match self.read()? {
                Some(ch) => text.push(ch),
                None => return Ok(None),
            }
        }
    }

    /// Consume characters while `predicate` holds.
    pub fn read_while(&mut self, predicate: impl Fn(char) -> bool) -> Result<String, ParseError> {
        let mut text = String::new();
        while let Some(ch) = self.peek(0)? {
            if !predicate(ch) {
                break;
            }
            self.read()?;
            text.push(ch);
        }
        Ok(text)
    }

    fn matches_ahead(
        &mut self,
        pattern: &str,
        eq: impl Fn(char, char) -> bool,
    ) -> Result<bool, ParseError> {
        let wanted = pattern.chars().count();
        if !self.fill(wanted)? {
            return Ok(false);
        }
        Ok(pattern
            .chars()
            .zip(self.lookahead.iter())
            .all(|(p, &c)| eq(c, p)))
    }

    fn advance(&mut self, ch: char) {
        self.location.byte_offset += ch.len_utf8();
        match ch {
            '\r' => {
                self.location.line += 1;
                self.location.column = 1;
                self.after_cr = true;
            }
            '\n' => {
                // `\r\n` was already counted at the `\r`.
                if !self.after_cr {
                    self.location.line += 1;
                }
                self.location.column = 1;
                self.after_cr = false;
            }
            _ => {
                self.location.column += 1;
                self.after_cr = false;
            }
        }
    }

    /// Make sure at least `wanted` characters are buffered, if input allows.
    fn fill(&mut self, wanted: usize) -> Result<bool, ParseError> {
        while self.lookahead.len() < wanted && !self.exhausted {
            let mut chunk = [0u8; CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ParseError::Io(e)),
            };
            if read == 0 {
                self.exhausted = true;
                if !self.pending_bytes.is_empty() {
                    return Err(ParseError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "input ends inside a UTF-8 sequence",
                    )));
                }
                break;
            }
            self.pending_bytes.extend_from_slice(&chunk[..read]);
            self.decode_pending()?;
        }
        Ok(self.lookahead.len() >= wanted)
    }

    fn decode_pending(&mut self) -> Result<(), ParseError> {
        let valid_up_to = match std::str::from_utf8(&self.pending_bytes) {
            Ok(text) => {
                self.lookahead.extend(text.chars());
                self.pending_bytes.clear();
                return Ok(());
            }
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => return Err(ParseError::Io(io::Error::new(io::ErrorKind::InvalidData, e))),
        };
        let text = std::str::from_utf8(&self.pending_bytes[..valid_up_to])
            .map_err(|e| ParseError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        self.lookahead.extend(text.chars());
        self.pending_bytes.drain(..valid_up_to);
        Ok(())
    }
}
