use std::borrow::Cow;
use std::sync::Arc;

/// Text encoding of a [`SourceBuffer`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Encoding {
    #[default]
    Utf8,
    Utf16Le,
}

/// Shader source bytes tagged with their encoding.
///
/// The buffer only has to outlive the `compile` call; the session decodes it up front.
#[derive(Debug, Clone)]
pub struct SourceBuffer<'a> {
    bytes: Cow<'a, [u8]>,
    encoding: Encoding,
}

impl<'a> SourceBuffer<'a> {
    /// A UTF-8 buffer.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self::with_encoding(bytes, Encoding::Utf8)
    }

    pub fn with_encoding(bytes: &'a [u8], encoding: Encoding) -> Self {
        Self {
            bytes: Cow::Borrowed(bytes),
            encoding,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub(crate) fn decode(&self) -> Result<String, DecodeFailure> {
        decode(&self.bytes, self.encoding)
    }
}

impl<'a> From<&'a str> for SourceBuffer<'a> {
    fn from(value: &'a str) -> Self {
        SourceBuffer::new(value.as_bytes())
    }
}

impl<'a> From<&'a [u8]> for SourceBuffer<'a> {
    fn from(value: &'a [u8]) -> Self {
        SourceBuffer::new(value)
    }
}

impl From<Vec<u8>> for SourceBuffer<'static> {
    fn from(value: Vec<u8>) -> Self {
        SourceBuffer {
            bytes: Cow::Owned(value),
            encoding: Encoding::Utf8,
        }
    }
}

/// Where and why decoding stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DecodeFailure {
    pub message: &'static str,
    pub line: u32,
    pub column: u32,
}

pub(crate) fn decode(bytes: &[u8], encoding: Encoding) -> Result<String, DecodeFailure> {
    match encoding {
        Encoding::Utf8 => {
            let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
            match std::str::from_utf8(bytes) {
                Ok(text) => Ok(text.to_owned()),
                Err(e) => {
                    let (line, column) = position_of(&bytes[..e.valid_up_to()]);
                    Err(DecodeFailure {
                        message: "source file is not valid UTF-8",
                        line,
                        column,
                    })
                }
            }
        }
        Encoding::Utf16Le => {
            if bytes.len() % 2 != 0 {
                return Err(DecodeFailure {
                    message: "source file has an odd number of bytes for UTF-16",
                    line: 1,
                    column: 1,
                });
            }

            let units = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));

            let mut text = String::with_capacity(bytes.len() / 2);
            for c in char::decode_utf16(units) {
                match c {
                    Ok(c) => text.push(c),
                    Err(_) => {
                        let (line, column) = position_of(text.as_bytes());
                        return Err(DecodeFailure {
                            message: "source file is not valid UTF-16",
                            line,
                            column,
                        });
                    }
                }
            }

            Ok(text.strip_prefix('\u{feff}').map(str::to_owned).unwrap_or(text))
        }
    }
}

fn position_of(prefix: &[u8]) -> (u32, u32) {
    let line = prefix.iter().filter(|&&b| b == b'\n').count() as u32 + 1;
    let column = match prefix.iter().rposition(|&b| b == b'\n') {
        Some(newline) => prefix.len() - newline,
        None => prefix.len() + 1,
    };
    (line, column as u32)
}

/// Decoded main source file of one compile.
#[derive(Debug, Clone)]
pub struct TranslationUnit {
    pub name: Arc<str>,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_utf8_bom() {
        let buffer = SourceBuffer::new(b"\xEF\xBB\xBFfloat x;");
        assert_eq!(buffer.decode().unwrap(), "float x;");
    }

    #[test]
    fn reports_invalid_utf8_position() {
        let buffer = SourceBuffer::new(b"float a;\nfl\xFFoat b;");
        let failure = buffer.decode().unwrap_err();
        assert_eq!((failure.line, failure.column), (2, 3));
    }

    #[test]
    fn decodes_utf16() {
        let bytes: Vec<u8> = "int x;"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        let buffer = SourceBuffer::with_encoding(&bytes, Encoding::Utf16Le);
        assert_eq!(buffer.decode().unwrap(), "int x;");

        let odd = SourceBuffer::with_encoding(&bytes[..3], Encoding::Utf16Le);
        assert!(odd.decode().is_err());
    }

    #[test]
    fn empty_buffer_decodes() {
        assert_eq!(SourceBuffer::new(b"").decode().unwrap(), "");
    }
}
