//! Bridges the interpreter's byte-oriented output channels to host text
//! sinks.
//!
//! Bytes are buffered and decoded incrementally. A decode pass runs when the
//! buffer fills up or a line break arrives, so line-oriented output shows up
//! promptly. Bytes of a character that has not fully arrived stay buffered
//! for the next pass.

use std::{
    cell::{Cell, RefCell},
    char::REPLACEMENT_CHARACTER,
    fmt, io,
    rc::Rc,
};

use tracing::warn;

use crate::config::{Charset, DEFAULT_BUFFER_CAPACITY};

/// Destination for decoded characters.
pub trait CharSink {
    fn write_char(&mut self, ch: char) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl CharSink for String {
    fn write_char(&mut self, ch: char) -> io::Result<()> {
        self.push(ch);
        Ok(())
    }
}

impl<S: CharSink + ?Sized> CharSink for Box<S> {
    fn write_char(&mut self, ch: char) -> io::Result<()> {
        (**self).write_char(ch)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// In-memory sink whose clones share one buffer, so the host can keep a
/// handle while the bridge owns another.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    text: Rc<RefCell<String>>,
    flushes: Rc<Cell<usize>>,
    closed: Rc<Cell<bool>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.text.borrow().clone()
    }

    pub fn take(&self) -> String {
        std::mem::take(&mut *self.text.borrow_mut())
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.get()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl CharSink for SharedBuffer {
    fn write_char(&mut self, ch: char) -> io::Result<()> {
        if self.closed.get() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink is closed"));
        }
        self.text.borrow_mut().push(ch);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flushes.set(self.flushes.get() + 1);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed.set(true);
        Ok(())
    }
}

/// Writes characters UTF-8 encoded into any byte writer, such as a file or
/// the process standard output.
#[derive(Debug)]
pub struct WriterSink<W: io::Write> {
    writer: W,
}

impl<W: io::Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: io::Write> CharSink for WriterSink<W> {
    fn write_char(&mut self, ch: char) -> io::Result<()> {
        let mut encoded = [0u8; 4];
        self.writer
            .write_all(ch.encode_utf8(&mut encoded).as_bytes())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Outcome of one decode pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Input bytes turned into characters (or replacement characters).
    pub consumed: usize,
    /// Malformed sequences replaced with U+FFFD.
    pub malformed: usize,
}

/// Stateless decoding step. Bytes of an incomplete trailing sequence are
/// left unconsumed; the bridge keeps them in its own byte buffer until the
/// next pass.
pub trait Decoder {
    /// Decodes as much of `input` as forms complete characters. With `last`
    /// set, an incomplete trailing sequence is emitted as U+FFFD.
    fn decode(&mut self, input: &[u8], out: &mut String, last: bool) -> Decoded;
}

pub fn decoder_for(charset: Charset) -> Box<dyn Decoder> {
    match charset {
        Charset::Utf8 => Box::new(Utf8Decoder),
        Charset::Latin1 => Box::new(Latin1Decoder),
    }
}

#[derive(Debug, Default)]
pub struct Utf8Decoder;

impl Decoder for Utf8Decoder {
    fn decode(&mut self, input: &[u8], out: &mut String, last: bool) -> Decoded {
        let mut result = Decoded::default();
        while result.consumed < input.len() {
            let rest = &input[result.consumed..];
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    result.consumed = input.len();
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&rest[..valid]) {
                        out.push_str(text);
                    }
                    result.consumed += valid;
                    match err.error_len() {
                        Some(len) => {
                            out.push(REPLACEMENT_CHARACTER);
                            result.malformed += 1;
                            result.consumed += len;
                        }
                        None => {
                            if last {
                                out.push(REPLACEMENT_CHARACTER);
                                result.malformed += 1;
                                result.consumed = input.len();
                            }
                            break;
                        }
                    }
                }
            }
        }
        result
    }
}

#[derive(Debug, Default)]
pub struct Latin1Decoder;

impl Decoder for Latin1Decoder {
    fn decode(&mut self, input: &[u8], out: &mut String, _last: bool) -> Decoded {
        out.extend(input.iter().copied().map(char::from));
        Decoded {
            consumed: input.len(),
            malformed: 0,
        }
    }
}

/// Incremental byte-to-character bridge for one output channel.
pub struct OutputBridge<S: CharSink> {
    sink: S,
    charset: Charset,
    decoder: Box<dyn Decoder>,
    bytes: Vec<u8>,
    capacity: usize,
    chars: String,
    malformed: usize,
}

impl<S: CharSink> OutputBridge<S> {
    pub fn new(sink: S, charset: Charset) -> Self {
        Self::with_capacity(sink, charset, DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(sink: S, charset: Charset, capacity: usize) -> Self {
        let capacity = capacity.max(4);
        Self {
            sink,
            charset,
            decoder: decoder_for(charset),
            bytes: Vec::with_capacity(capacity),
            capacity,
            chars: String::with_capacity(capacity),
            malformed: 0,
        }
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes received but not yet decoded.
    pub fn pending_bytes(&self) -> usize {
        self.bytes.len()
    }

    pub fn malformed_count(&self) -> usize {
        self.malformed
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.bytes.push(byte);
        if self.bytes.len() >= self.capacity || byte == b'\n' || byte == b'\r' {
            self.decode(false)?;
        }
        Ok(())
    }

    /// Decodes buffered bytes and forwards the characters to the sink.
    /// Malformed input is replaced and logged, never reported as an error;
    /// only failures of the sink itself are returned. A final pass also
    /// discards leftover bytes so the next write starts a new session.
    pub fn decode(&mut self, last: bool) -> io::Result<()> {
        let outcome = self.decoder.decode(&self.bytes, &mut self.chars, last);
        if outcome.malformed > 0 {
            self.malformed += outcome.malformed;
            warn!(
                charset = %self.charset,
                sequences = outcome.malformed,
                "malformed byte sequence in script output"
            );
        }
        self.bytes.drain(..outcome.consumed);
        let forwarded = self
            .chars
            .chars()
            .try_for_each(|ch| self.sink.write_char(ch));
        self.chars.clear();
        if last {
            self.bytes.clear();
        }
        forwarded
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.decode(true)?;
        self.sink.flush()
    }

    /// Closes the sink. Bytes still buffered are not decoded.
    pub fn close(&mut self) -> io::Result<()> {
        self.sink.close()
    }
}

impl<S: CharSink> io::Write for OutputBridge<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            self.write_byte(byte)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        OutputBridge::flush(self)
    }
}

impl<S: CharSink> fmt::Debug for OutputBridge<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBridge")
            .field("charset", &self.charset)
            .field("capacity", &self.capacity)
            .field("pending", &self.bytes.len())
            .field("malformed", &self.malformed)
            .finish()
    }
}
