//! Bounded streaming codec for the CBOR subset the CTAP2 grammar uses.
//!
//! Supported: major types 0–5 (unsigned, negative, byte string, text
//! string, array, map) plus the boolean simple values, with arguments in
//! the 0..23, 1-byte, 2-byte and 4-byte forms. Indefinite-length items,
//! tags and 8-byte arguments are outside the subset and rejected.
//!
//! The encoder writes into a caller-supplied buffer and never panics on
//! exhaustion; it raises an overflow flag instead, which callers must
//! check via [`Writer::finish`]. The decoder is a cursor over a bounded
//! slice; every read is bounds-checked.

use core::str;

const MAJOR_UNSIGNED: u8 = 0;
const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_TAG: u8 = 6;
const MAJOR_SIMPLE: u8 = 7;

const SIMPLE_FALSE: u64 = 20;
const SIMPLE_TRUE: u64 = 21;

/// Decoding errors. After an error the cursor position is unspecified.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// The input ended in the middle of a value.
    Truncated,
    /// The value at the cursor has a different type than the caller asked for.
    TypeMismatch,
    /// Well-formed CBOR outside the supported subset.
    Unsupported,
}

pub type Result<T> = core::result::Result<T, Error>;

/// The encoder ran out of buffer; the output is truncated and unusable.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Overflow;

/// Cursor over a CBOR-encoded slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, position: 0 }
    }

    /// Offset of the cursor from the start of the input.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_at_end(&self) -> bool {
        self.position == self.buf.len()
    }

    fn take(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self.position.checked_add(length).ok_or(Error::Truncated)?;
        if end > self.buf.len() {
            return Err(Error::Truncated);
        }
        let bytes = &self.buf[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Consume an initial byte and its argument, `(major, argument)`.
    fn head(&mut self) -> Result<(u8, u64)> {
        let initial = self.take(1)?[0];
        let major = initial >> 5;
        let argument = match initial & 0x1f {
            info @ 0..=23 => u64::from(info),
            24 => u64::from(self.take(1)?[0]),
            25 => {
                let bytes = self.take(2)?;
                u64::from(u16::from_be_bytes([bytes[0], bytes[1]]))
            }
            26 => {
                let bytes = self.take(4)?;
                u64::from(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            // 27 is the 8-byte form, 28..=30 are reserved, 31 is
            // indefinite length; none of them are in the subset.
            _ => return Err(Error::Unsupported),
        };
        Ok((major, argument))
    }

    fn expect(&mut self, major: u8) -> Result<u64> {
        let (got, argument) = self.head()?;
        if got != major {
            return Err(Error::TypeMismatch);
        }
        Ok(argument)
    }

    fn length(argument: u64) -> Result<usize> {
        usize::try_from(argument).map_err(|_| Error::Truncated)
    }

    pub fn unsigned(&mut self) -> Result<u64> {
        self.expect(MAJOR_UNSIGNED)
    }

    /// Signed integer from major type 0 or 1 (`-1 - n` encoding).
    pub fn integer(&mut self) -> Result<i64> {
        let (major, argument) = self.head()?;
        match major {
            MAJOR_UNSIGNED => i64::try_from(argument).map_err(|_| Error::Unsupported),
            MAJOR_NEGATIVE => {
                let n = i64::try_from(argument).map_err(|_| Error::Unsupported)?;
                Ok(-1 - n)
            }
            _ => Err(Error::TypeMismatch),
        }
    }

    pub fn byte_string(&mut self) -> Result<&'a [u8]> {
        let argument = self.expect(MAJOR_BYTES)?;
        self.take(Self::length(argument)?)
    }

    pub fn text_string(&mut self) -> Result<&'a str> {
        let argument = self.expect(MAJOR_TEXT)?;
        let bytes = self.take(Self::length(argument)?)?;
        str::from_utf8(bytes).map_err(|_| Error::TypeMismatch)
    }

    /// Array header; the caller reads that many values.
    pub fn array(&mut self) -> Result<usize> {
        let argument = self.expect(MAJOR_ARRAY)?;
        Self::length(argument)
    }

    /// Map header; the caller reads that many key/value pairs.
    pub fn map(&mut self) -> Result<usize> {
        let argument = self.expect(MAJOR_MAP)?;
        Self::length(argument)
    }

    pub fn boolean(&mut self) -> Result<bool> {
        match self.expect(MAJOR_SIMPLE)? {
            SIMPLE_FALSE => Ok(false),
            SIMPLE_TRUE => Ok(true),
            _ => Err(Error::TypeMismatch),
        }
    }

    /// Advance past one complete value of any supported type, including
    /// arbitrarily nested arrays and maps.
    ///
    /// This is what makes the command parsers order-independent: unknown
    /// or unneeded map entries are skipped wholesale instead of being
    /// threaded through ad-hoc control flow.
    pub fn skip(&mut self) -> Result<()> {
        // Iterative: `pending` counts values still to consume, so deeply
        // nested inputs cannot exhaust the call stack.
        let mut pending: usize = 1;
        while pending > 0 {
            pending -= 1;
            let (major, argument) = self.head()?;
            match major {
                MAJOR_UNSIGNED | MAJOR_NEGATIVE | MAJOR_SIMPLE => {}
                MAJOR_BYTES | MAJOR_TEXT => {
                    self.take(Self::length(argument)?)?;
                }
                MAJOR_ARRAY => {
                    pending = pending
                        .checked_add(Self::length(argument)?)
                        .ok_or(Error::Truncated)?;
                }
                MAJOR_MAP => {
                    let entries = Self::length(argument)?
                        .checked_mul(2)
                        .ok_or(Error::Truncated)?;
                    pending = pending.checked_add(entries).ok_or(Error::Truncated)?;
                }
                _ => return Err(Error::Unsupported),
            }
        }
        Ok(())
    }

    /// Borrow the raw encoding of the next complete value.
    ///
    /// Used by the two-pass command parsers to stash a value (say, an
    /// allowList) and re-decode it once the surrounding context is known.
    pub fn raw_value(&mut self) -> Result<&'a [u8]> {
        let start = self.position;
        self.skip()?;
        Ok(&self.buf[start..self.position])
    }
}

/// Encoder into a caller-supplied buffer.
pub struct Writer<'a> {
    buf: &'a mut [u8],
    position: usize,
    overflowed: bool,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            position: 0,
            overflowed: false,
        }
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Number of bytes written, or [`Overflow`] if the buffer was too small.
    pub fn finish(self) -> core::result::Result<usize, Overflow> {
        if self.overflowed {
            Err(Overflow)
        } else {
            Ok(self.position)
        }
    }

    fn put(&mut self, bytes: &[u8]) {
        if self.overflowed {
            return;
        }
        let end = match self.position.checked_add(bytes.len()) {
            Some(end) if end <= self.buf.len() => end,
            _ => {
                self.overflowed = true;
                return;
            }
        };
        self.buf[self.position..end].copy_from_slice(bytes);
        self.position = end;
    }

    fn head(&mut self, major: u8, argument: u64) {
        let major = major << 5;
        if argument < 24 {
            self.put(&[major | argument as u8]);
        } else if argument <= 0xff {
            self.put(&[major | 24, argument as u8]);
        } else if argument <= 0xffff {
            let bytes = (argument as u16).to_be_bytes();
            self.put(&[major | 25, bytes[0], bytes[1]]);
        } else if argument <= 0xffff_ffff {
            let bytes = (argument as u32).to_be_bytes();
            self.put(&[major | 26, bytes[0], bytes[1], bytes[2], bytes[3]]);
        } else {
            // 8-byte form; nothing in the protocol produces it.
            self.overflowed = true;
        }
    }

    pub fn unsigned(&mut self, value: u64) {
        self.head(MAJOR_UNSIGNED, value);
    }

    pub fn integer(&mut self, value: i64) {
        if value >= 0 {
            self.head(MAJOR_UNSIGNED, value as u64);
        } else {
            self.head(MAJOR_NEGATIVE, !(value as u64));
        }
    }

    pub fn byte_string(&mut self, bytes: &[u8]) {
        self.head(MAJOR_BYTES, bytes.len() as u64);
        self.put(bytes);
    }

    pub fn text_string(&mut self, text: &str) {
        self.head(MAJOR_TEXT, text.len() as u64);
        self.put(text.as_bytes());
    }

    pub fn array(&mut self, length: usize) {
        self.head(MAJOR_ARRAY, length as u64);
    }

    pub fn map(&mut self, length: usize) {
        self.head(MAJOR_MAP, length as u64);
    }

    pub fn boolean(&mut self, value: bool) {
        let simple = if value { SIMPLE_TRUE } else { SIMPLE_FALSE };
        self.head(MAJOR_SIMPLE, simple);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn encode(f: impl FnOnce(&mut Writer)) -> std::vec::Vec<u8> {
        let mut buf = [0u8; 512];
        let mut writer = Writer::new(&mut buf);
        f(&mut writer);
        let length = writer.finish().unwrap();
        buf[..length].to_vec()
    }

    #[test]
    fn unsigned_forms() {
        for (value, expected) in [
            (0u64, &hex!("00")[..]),
            (23, &hex!("17")),
            (24, &hex!("1818")),
            (255, &hex!("18ff")),
            (256, &hex!("190100")),
            (65535, &hex!("19ffff")),
            (65536, &hex!("1a00010000")),
        ] {
            let encoded = encode(|w| w.unsigned(value));
            assert_eq!(encoded, expected);
            assert_eq!(Reader::new(&encoded).unsigned().unwrap(), value);
        }
    }

    #[test]
    fn negative_integers() {
        for (value, expected) in [
            (-1i64, &hex!("20")[..]),
            (-7, &hex!("26")),
            (-24, &hex!("37")),
            (-25, &hex!("3818")),
            (-256, &hex!("38ff")),
            (-257, &hex!("390100")),
        ] {
            let encoded = encode(|w| w.integer(value));
            assert_eq!(encoded, expected);
            assert_eq!(Reader::new(&encoded).integer().unwrap(), value);
        }
    }

    #[test]
    fn strings_round_trip() {
        let bytes = [0xab; 300];
        let encoded = encode(|w| w.byte_string(&bytes));
        assert_eq!(encoded[..3], hex!("59012c"));
        assert_eq!(Reader::new(&encoded).byte_string().unwrap(), &bytes[..]);

        let encoded = encode(|w| w.text_string("public-key"));
        assert_eq!(Reader::new(&encoded).text_string().unwrap(), "public-key");
    }

    #[test]
    fn containers_round_trip() {
        let encoded = encode(|w| {
            w.map(2);
            w.unsigned(1);
            w.array(2);
            w.text_string("U2F_V2");
            w.text_string("FIDO_2_0");
            w.unsigned(3);
            w.boolean(true);
        });
        let mut reader = Reader::new(&encoded);
        assert_eq!(reader.map().unwrap(), 2);
        assert_eq!(reader.unsigned().unwrap(), 1);
        assert_eq!(reader.array().unwrap(), 2);
        assert_eq!(reader.text_string().unwrap(), "U2F_V2");
        assert_eq!(reader.text_string().unwrap(), "FIDO_2_0");
        assert_eq!(reader.unsigned().unwrap(), 3);
        assert!(reader.boolean().unwrap());
        assert!(reader.is_at_end());
    }

    #[test]
    fn skip_advances_by_exact_encoded_length() {
        // one nested value per supported major type
        let values: &[std::vec::Vec<u8>] = &[
            encode(|w| w.unsigned(1000)),
            encode(|w| w.integer(-42)),
            encode(|w| w.byte_string(&[1, 2, 3])),
            encode(|w| w.text_string("example.com")),
            encode(|w| {
                w.array(3);
                w.unsigned(1);
                w.map(1);
                w.text_string("alg");
                w.integer(-7);
                w.byte_string(&[0; 64]);
            }),
            encode(|w| {
                w.map(2);
                w.text_string("id");
                w.byte_string(&[9; 60]);
                w.text_string("transports");
                w.array(2);
                w.text_string("usb");
                w.text_string("nfc");
            }),
            encode(|w| w.boolean(false)),
        ];
        for value in values {
            // trailing garbage must be left untouched
            let mut input = value.clone();
            input.extend_from_slice(&[0xde, 0xad]);
            let mut reader = Reader::new(&input);
            reader.skip().unwrap();
            assert_eq!(reader.position(), value.len());
        }
    }

    #[test]
    fn rejects_indefinite_and_wide_forms() {
        // indefinite array, indefinite byte string, 8-byte unsigned
        for input in [&hex!("9fff")[..], &hex!("5f41aaff"), &hex!("1b0000000000000001")] {
            assert_eq!(Reader::new(input).skip(), Err(Error::Unsupported));
        }
    }

    #[test]
    fn truncation_is_detected() {
        for input in [
            &hex!("19 01")[..],    // 2-byte argument cut short
            &hex!("58 20 aa bb"),  // byte string shorter than announced
            &hex!("82 01"),        // array missing an element
            &hex!("a1 01"),        // map missing a value
        ] {
            assert_eq!(Reader::new(input).skip(), Err(Error::Truncated));
        }
    }

    #[test]
    fn type_mismatch() {
        let encoded = encode(|w| w.text_string("oops"));
        assert_eq!(Reader::new(&encoded).unsigned(), Err(Error::TypeMismatch));
        let encoded = encode(|w| w.unsigned(2));
        assert_eq!(Reader::new(&encoded).boolean(), Err(Error::TypeMismatch));
    }

    #[test]
    fn raw_value_borrows_whole_encoding() {
        let inner = encode(|w| {
            w.array(1);
            w.map(1);
            w.text_string("id");
            w.byte_string(&[7; 60]);
        });
        let mut input = inner.clone();
        input.extend_from_slice(&encode(|w| w.unsigned(5)));
        let mut reader = Reader::new(&input);
        assert_eq!(reader.raw_value().unwrap(), &inner[..]);
        assert_eq!(reader.unsigned().unwrap(), 5);
    }

    #[test]
    fn writer_records_overflow() {
        let mut buf = [0u8; 4];
        let mut writer = Writer::new(&mut buf);
        writer.byte_string(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(writer.overflowed());
        assert_eq!(writer.finish(), Err(Overflow));
    }
}
