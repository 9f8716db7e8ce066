use std::fmt;

use pathway_base::PathwayResult;
use serde::Deserialize;

const REPLACEMENT: char = char::REPLACEMENT_CHARACTER;

/// Character encodings understood by streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Encoding {
    /// ISO-8859-1: every byte maps to the code point of the same value.
    #[default]
    Latin1,
    Ascii,
    Utf8,
}

impl Encoding {
    /// Looks up an encoding by name, ignoring case.
    pub fn for_name(name: &str) -> PathwayResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "iso-8859-1" | "iso8859-1" | "iso8859_1" | "8859_1" | "latin1" | "l1" => {
                Ok(Encoding::Latin1)
            }
            "us-ascii" | "ascii" => Ok(Encoding::Ascii),
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            _ => Err(pathway_base::err!("Unknown encoding '{}'", name)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Latin1 => "iso-8859-1",
            Encoding::Ascii => "us-ascii",
            Encoding::Utf8 => "utf-8",
        }
    }

    /// A fresh decoder, or `None` for the byte passthrough.
    pub fn decoder(&self) -> Option<Box<dyn Decoder>> {
        match self {
            Encoding::Latin1 => None,
            Encoding::Ascii => Some(Box::new(AsciiDecoder)),
            Encoding::Utf8 => Some(Box::new(Utf8Decoder::default())),
        }
    }

    /// Appends the encoded form of `text` to `out`. Unmappable characters become `?`.
    pub fn encode(&self, text: &str, out: &mut Vec<u8>) {
        match self {
            Encoding::Utf8 => out.extend_from_slice(text.as_bytes()),
            Encoding::Latin1 => out.extend(text.chars().map(|c| u8::try_from(c).unwrap_or(b'?'))),
            Encoding::Ascii => out.extend(
                text.chars()
                    .map(|c| if c.is_ascii() { c as u8 } else { b'?' }),
            ),
        }
    }
}

impl TryFrom<String> for Encoding {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Encoding::for_name(&name).map_err(|e| e.to_string())
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of feeding one byte to a [`Decoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStep {
    /// The byte was taken into an unfinished sequence.
    Pending,
    /// The byte completed a character.
    Char(char),
    /// The byte cannot continue the pending sequence. The sequence decodes to the given
    /// character and the byte was not taken; feed it again.
    Malformed(char),
}

/// Byte at a time character decoder.
///
/// Callers consume a byte from their buffer only when it was taken, so a decoder never holds
/// bytes beyond the character being assembled.
pub trait Decoder: Send + fmt::Debug {
    fn push(&mut self, byte: u8) -> DecodeStep;

    /// What an incomplete trailing sequence decodes to at end of stream.
    fn finish(&mut self) -> Option<char>;

    fn reset(&mut self);
}

#[derive(Debug)]
struct AsciiDecoder;

impl Decoder for AsciiDecoder {
    fn push(&mut self, byte: u8) -> DecodeStep {
        DecodeStep::Char(if byte.is_ascii() {
            byte as char
        } else {
            REPLACEMENT
        })
    }

    fn finish(&mut self) -> Option<char> {
        None
    }

    fn reset(&mut self) {}
}

#[derive(Debug, Default)]
struct Utf8Decoder {
    partial: [u8; 4],
    partial_len: usize,
    needed: usize,
}

impl Utf8Decoder {
    fn start(&mut self, byte: u8) -> DecodeStep {
        let needed = match byte {
            0x00..=0x7f => return DecodeStep::Char(byte as char),
            0xc2..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf4 => 4,
            _ => return DecodeStep::Char(REPLACEMENT),
        };
        self.partial[0] = byte;
        self.partial_len = 1;
        self.needed = needed;
        DecodeStep::Pending
    }
}

impl Decoder for Utf8Decoder {
    fn push(&mut self, byte: u8) -> DecodeStep {
        if self.needed == 0 {
            return self.start(byte);
        }
        if byte & 0xc0 != 0x80 {
            self.reset();
            return DecodeStep::Malformed(REPLACEMENT);
        }
        self.partial[self.partial_len] = byte;
        self.partial_len += 1;
        if self.partial_len < self.needed {
            return DecodeStep::Pending;
        }
        // overlong forms and surrogates pass the lead byte check but fail here
        let decoded = std::str::from_utf8(&self.partial[..self.partial_len])
            .ok()
            .and_then(|text| text.chars().next())
            .unwrap_or(REPLACEMENT);
        self.reset();
        DecodeStep::Char(decoded)
    }

    fn finish(&mut self) -> Option<char> {
        let incomplete = self.needed > 0;
        self.reset();
        incomplete.then_some(REPLACEMENT)
    }

    fn reset(&mut self) {
        self.partial_len = 0;
        self.needed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(encoding: Encoding, bytes: &[u8]) -> String {
        let mut decoder = encoding.decoder().unwrap();
        let mut out = String::new();
        for &byte in bytes {
            loop {
                match decoder.push(byte) {
                    DecodeStep::Pending => break,
                    DecodeStep::Char(c) => {
                        out.push(c);
                        break;
                    }
                    DecodeStep::Malformed(c) => out.push(c),
                }
            }
        }
        out.extend(decoder.finish());
        out
    }

    #[test]
    fn test_for_name_aliases() {
        assert_eq!(Encoding::for_name("UTF-8").unwrap(), Encoding::Utf8);
        assert_eq!(Encoding::for_name("latin1").unwrap(), Encoding::Latin1);
        assert_eq!(Encoding::for_name(" us-ascii ").unwrap(), Encoding::Ascii);
        assert!(Encoding::for_name("ebcdic").is_err());
    }

    #[test]
    fn test_utf8_takes_one_byte_at_a_time() {
        let mut decoder = Encoding::Utf8.decoder().unwrap();
        let steps: Vec<DecodeStep> = "€".bytes().map(|byte| decoder.push(byte)).collect();
        assert_eq!(
            steps,
            vec![
                DecodeStep::Pending,
                DecodeStep::Pending,
                DecodeStep::Char('€')
            ]
        );
        assert_eq!(decoder.finish(), None);
        assert_eq!(decode_all(Encoding::Utf8, "grüße €".as_bytes()), "grüße €");
    }

    #[test]
    fn test_utf8_invalid_bytes_become_replacement() {
        let decoded = decode_all(Encoding::Utf8, b"a\xffb\xc3(\xe2\x82");
        assert_eq!(decoded, "a\u{fffd}b\u{fffd}(\u{fffd}");
        // overlong encoding of '/'
        assert_eq!(decode_all(Encoding::Utf8, b"\xe0\x80\xaf"), "\u{fffd}");
    }

    #[test]
    fn test_byte_breaking_a_sequence_is_not_taken() {
        let mut decoder = Encoding::Utf8.decoder().unwrap();
        assert_eq!(decoder.push(0xc3), DecodeStep::Pending);
        assert_eq!(decoder.push(b'x'), DecodeStep::Malformed('\u{fffd}'));
        assert_eq!(decoder.push(b'x'), DecodeStep::Char('x'));
        assert_eq!(decode_all(Encoding::Ascii, b"a\x80"), "a\u{fffd}");
    }

    #[test]
    fn test_encode_unmappable_characters() {
        let mut out = Vec::new();
        Encoding::Latin1.encode("né€", &mut out);
        assert_eq!(out, b"n\xe9?");
        out.clear();
        Encoding::Ascii.encode("né", &mut out);
        assert_eq!(out, b"n?");
    }
}
