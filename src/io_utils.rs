//! I/O utilities: encoding resolution, strict character decoding, and
//! reader/writer construction.
//!
//! All byte-level concerns live here so the tokenizer can work purely in
//! characters. Decoding is strict: a byte sequence that is invalid for the
//! declared encoding is an error, never a silent replacement character,
//! because validation results must not depend on mangled input.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Decoder, Encoding, UTF_8};
use thiserror::Error;

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

/// Opens `path` for reading, routing `-` through stdin.
pub fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    if is_dash(path) {
        Ok(Box::new(io::stdin().lock()))
    } else {
        let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Creates a CSV writer for the accepted-rows sidecar. Quotes every field
/// so the output survives a round trip regardless of cell content.
pub fn open_csv_writer(path: &Path, delimiter: u8) -> Result<csv::Writer<BufWriter<File>>> {
    let file = File::create(path).with_context(|| format!("Creating output file {path:?}"))?;
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Always)
        .double_quote(true);
    Ok(builder.from_writer(BufWriter::new(file)))
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("byte sequence cannot be decoded using encoding {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Io(#[from] io::Error),
}

const READ_CHUNK: usize = 8 * 1024;

/// Pull-based character source over an encoded byte stream.
///
/// Decodes incrementally with `encoding_rs` and hands out one `char` at a
/// time, which is the shape the tokenizer's state machine wants.
pub struct DecodingReader<R: Read> {
    inner: R,
    decoder: Decoder,
    encoding_name: &'static str,
    raw: Vec<u8>,
    raw_start: usize,
    decoded: String,
    decoded_start: usize,
    input_exhausted: bool,
    finished: bool,
    pending_error: Option<DecodeError>,
}

impl<R: Read> DecodingReader<R> {
    pub fn new(inner: R, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            decoder: encoding.new_decoder(),
            encoding_name: encoding.name(),
            raw: Vec::with_capacity(READ_CHUNK),
            raw_start: 0,
            decoded: String::new(),
            decoded_start: 0,
            input_exhausted: false,
            finished: false,
            pending_error: None,
        }
    }

    /// Returns the next character, or `None` at end of input.
    pub fn next_char(&mut self) -> Result<Option<char>, DecodeError> {
        loop {
            if let Some(c) = self.decoded[self.decoded_start..].chars().next() {
                self.decoded_start += c.len_utf8();
                return Ok(Some(c));
            }
            self.decoded.clear();
            self.decoded_start = 0;
            if self.finished {
                // Characters decoded before a malformed sequence are
                // delivered first so failure positions stay accurate.
                return match self.pending_error.take() {
                    Some(err) => Err(err),
                    None => Ok(None),
                };
            }
            self.refill()?;
        }
    }

    fn refill(&mut self) -> Result<(), DecodeError> {
        if self.raw_start >= self.raw.len() && !self.input_exhausted {
            self.raw.clear();
            self.raw.resize(READ_CHUNK, 0);
            let read = self.inner.read(&mut self.raw)?;
            self.raw.truncate(read);
            self.raw_start = 0;
            if read == 0 {
                self.input_exhausted = true;
            }
        }

        let last = self.input_exhausted;
        // Reserve at least as much as the decoder asks for; decoding can
        // only make progress if the output buffer has room.
        let needed = self
            .decoder
            .max_utf8_buffer_length_without_replacement(self.raw.len() - self.raw_start)
            .unwrap_or(READ_CHUNK)
            .max(4);
        self.decoded.reserve(needed);
        let (result, bytes_read) = self.decoder.decode_to_string_without_replacement(
            &self.raw[self.raw_start..],
            &mut self.decoded,
            last,
        );
        self.raw_start += bytes_read;
        match result {
            encoding_rs::DecoderResult::Malformed(..) => {
                self.finished = true;
                self.pending_error = Some(DecodeError::Malformed(self.encoding_name));
                Ok(())
            }
            encoding_rs::DecoderResult::InputEmpty => {
                if last {
                    self.finished = true;
                }
                Ok(())
            }
            encoding_rs::DecoderResult::OutputFull => Ok(()),
        }
    }
}
