/*!
 Contains logic to decode binary property list data through caller-supplied
 callbacks.

 [`parse`] reads the trailer and offset table of a complete byte buffer, then
 decodes objects on demand starting from the root, dispatching on each
 object's tag byte. No staging tree is built on this side: every decoded
 element and collection boundary is reported to a [`Handler`], and only one
 object's bytes are ever in flight at a time.

 Logic referenced from the `CFBinaryPList` format description at:
   - [`CFBinaryPList.c`](https://opensource.apple.com/source/CF/CF-550/CFBinaryPList.c)
*/

use chrono::DateTime;

use crate::{
    error::parser::ParseError,
    models::{Collection, Type, Value, MAC_EPOCH_OFFSET},
};

/// The 6-byte magic number that starts every binary property list
const MAGIC: &[u8] = b"bplist";
/// The fixed byte length of the trailer record
const TRAILER_SIZE: usize = 32;

/// Callbacks that receive objects from a property list as it is decoded
///
/// If a callback reports an error, the walk aborts immediately and that
/// error propagates, uninterpreted, to the [`parse`] caller.
/// [`ParseError::Aborted`] is the conventional value for a handler that
/// simply wants to stop.
pub trait Handler {
    /// Called for the version string, e.g. `"00"`, before any structural
    /// validation of the offset table
    fn version(&mut self, version: &str) -> Result<(), ParseError>;

    /// Called for each primitive data element
    fn element(&mut self, typ: Type, value: Value) -> Result<(), ParseError>;

    /// Called to open a new collection of the given kind with `len` elements
    /// (pairs, for a dictionary)
    fn open(&mut self, kind: Collection, len: usize) -> Result<(), ParseError>;

    /// Called to close the latest collection of the given kind
    fn close(&mut self, kind: Collection) -> Result<(), ParseError>;
}

/// Decode a complete binary property list, driving `handler` with each
/// object reachable from the root
pub fn parse<H: Handler>(data: &[u8], handler: &mut H) -> Result<(), ParseError> {
    if !data.starts_with(MAGIC) {
        return Err(ParseError::InvalidMagic);
    }
    let min = MAGIC.len() + 2 + TRAILER_SIZE;
    if data.len() < min {
        return Err(ParseError::TruncatedInput(min, data.len()));
    }

    // Report the version eagerly so the caller can bail out on an
    // incompatible version before we touch the offset table.
    let version = std::str::from_utf8(&data[MAGIC.len()..MAGIC.len() + 2])
        .map_err(ParseError::InvalidString)?;
    handler.version(version)?;

    let trailer = Trailer::read(&data[data.len() - TRAILER_SIZE..])?;
    let table_end = trailer.table_end().ok_or(ParseError::InvalidOffsetTable)?;
    if table_end > data.len() - TRAILER_SIZE {
        return Err(ParseError::InvalidOffsetTable);
    }

    let mut offsets = Vec::with_capacity(trailer.num_objects);
    for id in 0..trailer.num_objects {
        let base = trailer.offset_table + trailer.offset_bytes * id;
        offsets.push(accumulate_int(&data[base..base + trailer.offset_bytes]) as usize);
    }

    let mut reader = Reader {
        data,
        offsets,
        ref_bytes: trailer.ref_bytes,
        handler,
    };
    reader.decode_object(trailer.root_object)
}

/// The fixed 32-byte index at the end of every stream
#[derive(Debug)]
struct Trailer {
    /// Byte width of each offset table entry
    offset_bytes: usize,
    /// Byte width of each object reference inside collections
    ref_bytes: usize,
    /// Number of entries in the offset table
    num_objects: usize,
    /// Object id of the root
    root_object: usize,
    /// File position of the offset table
    offset_table: usize,
}

impl Trailer {
    /// Unpack the trailer. Precondition: `data` is exactly 32 bytes.
    fn read(data: &[u8]) -> Result<Self, ParseError> {
        let trailer = Self {
            offset_bytes: data[6] as usize,
            ref_bytes: data[7] as usize,
            num_objects: read_word(&data[8..16])?,
            root_object: read_word(&data[16..24])?,
            offset_table: read_word(&data[24..32])?,
        };
        // Widths outside 1–8 cannot address anything.
        if !(1..=8).contains(&trailer.offset_bytes) || !(1..=8).contains(&trailer.ref_bytes) {
            return Err(ParseError::InvalidOffsetTable);
        }
        Ok(trailer)
    }

    /// File position one past the offset table, if it is representable
    fn table_end(&self) -> Option<usize> {
        self.offset_table
            .checked_add(self.offset_bytes.checked_mul(self.num_objects)?)
    }
}

/// Read one big-endian trailer word into a `usize`
fn read_word(data: &[u8]) -> Result<usize, ParseError> {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(data);
    usize::try_from(u64::from_be_bytes(raw)).map_err(|_| ParseError::InvalidOffsetTable)
}

/// Accumulate big-endian bytes into an `i64` by successive shifts
///
/// This deliberately matches the format's reference readers: widths below 8
/// bytes never sign-extend, so a one-byte `0xff` decodes as 255. Only a full
/// 8-byte payload lands in the sign bit and reads back as negative.
fn accumulate_int(data: &[u8]) -> i64 {
    let mut value = 0i64;
    for byte in data {
        value = (value << 8) | i64::from(*byte);
    }
    value
}

/// Contains state used to walk the object area of one stream
#[derive(Debug)]
struct Reader<'a, H> {
    /// The complete input buffer, header and trailer included
    data: &'a [u8],
    /// File offset of each object, indexed by object id
    offsets: Vec<usize>,
    /// Byte width of object references inside collections
    ref_bytes: usize,
    /// The callbacks receiving decoded objects
    handler: &'a mut H,
}

impl<H: Handler> Reader<'_, H> {
    /// Decode the object with the given id, recursing through collections
    fn decode_object(&mut self, id: usize) -> Result<(), ParseError> {
        let off = *self
            .offsets
            .get(id)
            .ok_or(ParseError::InvalidObjectReference(id))?;
        let tag = self.byte(off)?;

        match tag >> 4 {
            0x0 => match tag & 0x0f {
                0x0 => self.handler.element(Type::Null, Value::Null),
                0x8 => self.handler.element(Type::Bool, Value::Bool(false)),
                0x9 => self.handler.element(Type::Bool, Value::Bool(true)),
                _ => Err(ParseError::UnrecognizedTag(tag)),
            },
            0x1 => {
                let size = 1usize << (tag & 0x0f);
                let value = accumulate_int(self.bytes(off + 1, size)?);
                self.handler.element(Type::Integer, Value::Integer(value))
            }
            0x2 => {
                let size = 1usize << (tag & 0x0f);
                let value = f64::from_bits(accumulate_int(self.bytes(off + 1, size)?) as u64);
                self.handler.element(Type::Float, Value::Float(value))
            }
            0x3 if tag & 0x0f == 3 => {
                let sec = f64::from_bits(accumulate_int(self.bytes(off + 1, 8)?) as u64);
                // The payload is free-form IEEE-754; a huge magnitude must
                // surface as an error, not wrap past the epoch shift.
                let unix = (sec as i64)
                    .checked_add(MAC_EPOCH_OFFSET)
                    .ok_or(ParseError::InvalidTimestamp)?;
                let when =
                    DateTime::from_timestamp(unix, 0).ok_or(ParseError::InvalidTimestamp)?;
                self.handler.element(Type::Time, Value::Time(when))
            }
            0x4 => {
                let (size, shift) = self.size_and_shift(tag, off + 1)?;
                let data = self.bytes(off + 1 + shift, size)?.to_vec();
                self.handler.element(Type::Bytes, Value::Bytes(data))
            }
            0x5 | 0x7 => {
                let (size, shift) = self.size_and_shift(tag, off + 1)?;
                let text = std::str::from_utf8(self.bytes(off + 1 + shift, size)?)
                    .map_err(ParseError::InvalidString)?
                    .to_string();
                self.handler.element(Type::String, Value::String(text))
            }
            0x6 => {
                // The length counts UTF-16 code units, not bytes.
                let (size, shift) = self.size_and_shift(tag, off + 1)?;
                let units: Vec<u16> = self
                    .bytes(off + 1 + shift, size.saturating_mul(2))?
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                self.handler.element(Type::Unicode, Value::Unicode(units))
            }
            0x8 => {
                let (size, shift) = self.size_and_shift(tag, off + 1)?;
                let data = self.bytes(off + 1 + shift, size)?.to_vec();
                self.handler.element(Type::Uid, Value::Uid(data))
            }
            0xa | 0xb | 0xc => {
                let kind = if tag >> 4 == 0xa {
                    Collection::Array
                } else {
                    Collection::Set
                };
                let (size, shift) = self.size_and_shift(tag, off + 1)?;
                let ids = self.refs(off + 1 + shift, size)?;
                self.handler.open(kind, size)?;
                for id in ids {
                    self.decode_object(id)?;
                }
                self.handler.close(kind)
            }
            0xd => {
                // All key references precede all value references; report
                // each pair key-then-value in stored pair order.
                let (size, shift) = self.size_and_shift(tag, off + 1)?;
                let keys = self.refs(off + 1 + shift, size)?;
                let values = self.refs(
                    (off + 1 + shift).saturating_add(size.saturating_mul(self.ref_bytes)),
                    size,
                )?;
                self.handler.open(Collection::Dict, size)?;
                for (key, value) in keys.iter().zip(&values) {
                    self.decode_object(*key)?;
                    self.decode_object(*value)?;
                }
                self.handler.close(Collection::Dict)
            }
            _ => Err(ParseError::UnrecognizedTag(tag)),
        }
    }

    /// Resolve the size nibble of `tag`: an inline element count, or an
    /// extended length stored as a packed integer at `pos`, together with
    /// the byte count the length prefix itself occupies
    fn size_and_shift(&self, tag: u8, pos: usize) -> Result<(usize, usize), ParseError> {
        let nb = (tag & 0x0f) as usize;
        if nb < 15 {
            return Ok((nb, 0));
        }
        let marker = self.byte(pos)?;
        let size = 1usize << (marker & 0x0f);
        let length = accumulate_int(self.bytes(pos + 1, size)?) as usize;
        Ok((length, 1 + size))
    }

    /// Read `count` object references of the trailer's fixed width
    fn refs(&self, start: usize, count: usize) -> Result<Vec<usize>, ParseError> {
        let raw = self.bytes(start, count.saturating_mul(self.ref_bytes))?;
        Ok(raw
            .chunks_exact(self.ref_bytes)
            .map(|chunk| accumulate_int(chunk) as usize)
            .collect())
    }

    /// Get the byte at a given index, if it is within the stream's bounds
    fn byte(&self, idx: usize) -> Result<u8, ParseError> {
        self.data
            .get(idx)
            .copied()
            .ok_or(ParseError::TruncatedInput(idx, self.data.len()))
    }

    /// Read exactly `n` bytes starting at `start`
    fn bytes(&self, start: usize, n: usize) -> Result<&[u8], ParseError> {
        let end = start.saturating_add(n);
        self.data
            .get(start..end)
            .ok_or(ParseError::TruncatedInput(end, self.data.len()))
    }
}

#[cfg(test)]
mod accumulate_tests {
    use crate::parser::accumulate_int;

    #[test]
    fn narrow_widths_do_not_sign_extend() {
        assert_eq!(accumulate_int(&[0xff]), 255);
        assert_eq!(accumulate_int(&[0x01, 0x00]), 256);
        assert_eq!(accumulate_int(&[0xff, 0xff, 0xff, 0xff]), 0xffff_ffff);
    }

    #[test]
    fn full_width_reads_back_signed() {
        assert_eq!(accumulate_int(&[0xff; 8]), -1);
        assert_eq!(
            accumulate_int(&[0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
            i64::MIN
        );
    }
}
