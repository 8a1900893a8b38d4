/*!
 Contains logic to flatten a completed staging tree into the binary property
 list wire format.

 Objects are encoded depth-first, children before their parent, each exactly
 once: primitive elements with the same type and normalized value collapse to
 a single object id, while collections always receive a fresh id. After the
 object area is written, the offset table and fixed 32-byte trailer are
 assembled around it.
*/

use std::{collections::HashMap, io::Write};

use crate::{
    error::builder::BuildError,
    models::{Collection, Entry, Value, MAC_EPOCH_OFFSET},
};

/// The 6-byte magic plus the 2-byte version this encoder emits
const HEADER: &[u8] = b"bplist00";

/// Encode `root` and everything below it, then write the complete byte
/// stream (header, object area, offset table, trailer) to `w`.
///
/// `nobj` is the staged node count, the pre-dedup upper bound on object ids;
/// the reference width is fixed from it before any object is encoded and is
/// not revised even if deduplication ends up assigning fewer ids.
pub(crate) fn write_plist<W: Write>(
    root: &Entry,
    nobj: usize,
    w: &mut W,
) -> Result<u64, BuildError> {
    let mut encoder = Encoder::new(nobj);
    let root_id = encoder.encode(root);

    let mut total = 0u64;
    let mut write = |data: &[u8]| -> Result<u64, BuildError> {
        w.write_all(data)
            .map_err(|why| BuildError::Write(why.to_string()))?;
        Ok(data.len() as u64)
    };

    total += write(HEADER)?;
    total += write(&encoder.buf)?;

    // Each table entry must have enough bits for the largest possible object
    // offset, which is bounded by the file position of the table itself.
    let table_start = total;
    let offset_size = num_bytes(table_start + HEADER.len() as u64);

    let mut index = vec![];
    for id in 0..encoder.next_id {
        let offset = encoder
            .offset
            .get(&id)
            .ok_or(BuildError::MissingOffset(id))?;
        push_ref(&mut index, offset_size, (offset + HEADER.len()) as u64);
    }

    index.extend_from_slice(&[0; 6]);
    index.push(offset_size as u8);
    index.push(encoder.id_size as u8);
    index.extend_from_slice(&(encoder.next_id as u64).to_be_bytes());
    index.extend_from_slice(&(root_id as u64).to_be_bytes());
    index.extend_from_slice(&table_start.to_be_bytes());

    total += write(&index)?;
    Ok(total)
}

/// Contains state used to serialize staged objects into the object area
#[derive(Debug)]
struct Encoder {
    /// Byte count per object reference, fixed for the whole run
    id_size: usize,
    /// The next object id to assign
    next_id: usize,
    /// Already-encoded primitive values, for content-addressed deduplication
    objref: HashMap<CacheKey, usize>,
    /// Byte offset of each encoded object within the object area
    offset: HashMap<usize, usize>,
    /// The object area under construction
    buf: Vec<u8>,
}

impl Encoder {
    fn new(nobj: usize) -> Self {
        Self {
            id_size: num_bytes(nobj as u64),
            next_id: 0,
            objref: HashMap::new(),
            offset: HashMap::new(),
            buf: vec![],
        }
    }

    /// Encode one staged node, children first, and return its object id
    fn encode(&mut self, entry: &Entry) -> usize {
        match entry {
            Entry::Element(value) => self.encode_value(value),
            Entry::Collection { kind, content, .. } => {
                let ids: Vec<usize> = content.iter().map(|child| self.encode(child)).collect();
                self.encode_collection(*kind, &ids)
            }
        }
    }

    /// Encode a primitive element, or reuse the id of an identical one that
    /// was already emitted in this run
    fn encode_value(&mut self, value: &Value) -> usize {
        let key = CacheKey::from(value);
        if let Some(id) = self.objref.get(&key) {
            return *id;
        }

        let pos = self.buf.len();
        match value {
            Value::Null => self.buf.push(0x00),
            Value::Bool(false) => self.buf.push(0x08),
            Value::Bool(true) => self.buf.push(0x09),
            Value::Integer(v) => push_int(&mut self.buf, 0x10, *v as u64),
            Value::Float(v) => {
                self.buf.push(0x23);
                self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
            }
            Value::Time(when) => {
                let sec = (when.timestamp() - MAC_EPOCH_OFFSET) as f64;
                self.buf.push(0x33);
                self.buf.extend_from_slice(&sec.to_bits().to_be_bytes());
            }
            Value::Bytes(data) => push_data(&mut self.buf, 0x40, data),
            Value::String(text) if text.is_ascii() => {
                push_data(&mut self.buf, 0x50, text.as_bytes());
            }
            Value::String(text) => push_data(&mut self.buf, 0x70, text.as_bytes()),
            Value::Unicode(units) => {
                // The length field counts UTF-16 code units, not bytes.
                push_count(&mut self.buf, 0x60, units.len());
                for unit in units {
                    self.buf.extend_from_slice(&unit.to_be_bytes());
                }
            }
            Value::Uid(data) => push_data(&mut self.buf, 0x80, data),
        }

        let id = self.next_id;
        self.next_id += 1;
        self.objref.insert(key, id);
        self.offset.insert(id, pos);
        id
    }

    /// Encode a collection whose children have already been assigned ids
    fn encode_collection(&mut self, kind: Collection, ids: &[usize]) -> usize {
        let pos = self.buf.len();
        let (tag, count) = match kind {
            Collection::Array => (0xa0, ids.len()),
            Collection::Set => (0xc0, ids.len()),
            // A dictionary's count is pairs, not children
            Collection::Dict => (0xd0, ids.len() / 2),
        };
        push_count(&mut self.buf, tag, count);

        if kind == Collection::Dict {
            for id in ids.iter().step_by(2) {
                push_ref(&mut self.buf, self.id_size, *id as u64); // keys
            }
            for id in ids.iter().skip(1).step_by(2) {
                push_ref(&mut self.buf, self.id_size, *id as u64); // values
            }
        } else {
            for id in ids {
                push_ref(&mut self.buf, self.id_size, *id as u64);
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.offset.insert(id, pos);
        id
    }
}

/// A hashable stand-in for a normalized (type, value) pair; two elements
/// share an encoded object exactly when their keys compare equal
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Null,
    Bool(bool),
    Integer(i64),
    Float(u64),
    Time(u64),
    Bytes(Vec<u8>),
    String(String),
    Unicode(Vec<u16>),
    Uid(Vec<u8>),
}

impl From<&Value> for CacheKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => CacheKey::Null,
            Value::Bool(v) => CacheKey::Bool(*v),
            Value::Integer(v) => CacheKey::Integer(*v),
            Value::Float(v) => CacheKey::Float(v.to_bits()),
            Value::Time(when) => {
                CacheKey::Time(((when.timestamp() - MAC_EPOCH_OFFSET) as f64).to_bits())
            }
            Value::Bytes(data) => CacheKey::Bytes(data.clone()),
            Value::String(text) => CacheKey::String(text.clone()),
            Value::Unicode(units) => CacheKey::Unicode(units.clone()),
            Value::Uid(data) => CacheKey::Uid(data.clone()),
        }
    }
}

/// The smallest byte count (1–8) able to represent `v`
fn num_bytes(v: u64) -> usize {
    let mut nb = 1;
    while nb < 8 && v >= 1u64 << (8 * nb) {
        nb += 1;
    }
    nb
}

/// The smallest power-of-two byte count holding `v`, and its log2 for the
/// tag's size nibble
fn int_size(v: u64) -> (usize, u8) {
    match v {
        0..=0xff => (1, 0),
        0x100..=0xffff => (2, 1),
        0x1_0000..=0xffff_ffff => (4, 2),
        _ => (8, 3),
    }
}

/// Append a tagged integer at its minimal power-of-two width, big-endian
fn push_int(buf: &mut Vec<u8>, tag: u8, v: u64) {
    let (nb, p2) = int_size(v);
    buf.push(tag | p2);
    buf.extend_from_slice(&v.to_be_bytes()[8 - nb..]);
}

/// Append a tag with an inline count, or the extended-length marker followed
/// by a packed integer when the count does not fit the low nibble
fn push_count(buf: &mut Vec<u8>, tag: u8, count: usize) {
    if count >= 15 {
        buf.push(tag | 0x0f);
        push_int(buf, 0x10, count as u64);
    } else {
        buf.push(tag | count as u8);
    }
}

/// Append a length-prefixed run of raw bytes
fn push_data(buf: &mut Vec<u8>, tag: u8, data: &[u8]) {
    push_count(buf, tag, data.len());
    buf.extend_from_slice(data);
}

/// Append an object reference or offset at the fixed width `nb`, big-endian
fn push_ref(buf: &mut Vec<u8>, nb: usize, v: u64) {
    buf.extend_from_slice(&v.to_be_bytes()[8 - nb..]);
}
