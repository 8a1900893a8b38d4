/*!
 Data structures used to describe a binary property list object graph.

 A property list is a typed tree: leaves are one of nine primitive kinds and
 interior nodes are one of three collection kinds. The same vocabulary is used
 on both sides of the codec; the [`Builder`](crate::builder::Builder) stages
 these values for encoding, and the [`parser`](crate::parser) reports them
 back through [`Handler`](crate::parser::Handler) callbacks.
*/

use std::fmt::{Display, Formatter, Result};

use chrono::{DateTime, Utc};

/// Seconds between the Unix epoch and the Mac epoch (2001-01-01T00:00:00Z),
/// the zero point for dates in a binary property list
pub const MAC_EPOCH_OFFSET: i64 = 978_307_200;

/// The types of primitive elements in a property list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    /// The singleton null value; its datum is [`Value::Null`]
    Null,
    /// A Boolean value
    Bool,
    /// A 64-bit signed integer
    Integer,
    /// A 64-bit IEEE-754 float
    Float,
    /// An absolute timestamp, normalized to UTC
    Time,
    /// An opaque byte sequence
    Bytes,
    /// A Unicode text value, stored as ASCII or UTF-8 depending on content
    String,
    /// A text value explicitly requested as UTF-16 code units
    Unicode,
    /// An opaque byte sequence tagged distinctly from [`Type::Bytes`]
    Uid,
}

impl Display for Type {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result {
        match self {
            Type::Null => write!(fmt, "null"),
            Type::Bool => write!(fmt, "bool"),
            Type::Integer => write!(fmt, "int"),
            Type::Float => write!(fmt, "float"),
            Type::Time => write!(fmt, "time"),
            Type::Bytes => write!(fmt, "bytes"),
            Type::String => write!(fmt, "string"),
            Type::Unicode => write!(fmt, "unicode"),
            Type::Uid => write!(fmt, "uid"),
        }
    }
}

/// The kinds of container elements in a property list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    /// An ordered sequence; duplicates allowed
    Array,
    /// An unordered group, encoded identically to an array on the wire
    Set,
    /// An ordered sequence of key/value pairs
    Dict,
}

impl Display for Collection {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result {
        match self {
            Collection::Array => write!(fmt, "array"),
            Collection::Set => write!(fmt, "set"),
            Collection::Dict => write!(fmt, "dict"),
        }
    }
}

/// A native datum carried by a primitive element
///
/// Each variant is the canonical representation for one [`Type`]; the
/// [`Builder`](crate::builder::Builder) normalizes permissive inputs (for
/// example, string data for [`Type::Bytes`]) into these variants before
/// staging them.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No payload
    Null,
    /// A Boolean value
    Bool(bool),
    /// A signed integer
    Integer(i64),
    /// A double-precision float
    Float(f64),
    /// A UTC timestamp; stored on disk as float seconds since the Mac epoch
    Time(DateTime<Utc>),
    /// Arbitrary bytes
    Bytes(Vec<u8>),
    /// Text; always valid UTF-8 in memory
    String(String),
    /// UTF-16 code units, not necessarily forming valid text
    Unicode(Vec<u16>),
    /// UID bytes
    Uid(Vec<u8>),
}

impl Value {
    /// The primitive type this datum canonically belongs to
    pub fn plist_type(&self) -> Type {
        match self {
            Value::Null => Type::Null,
            Value::Bool(_) => Type::Bool,
            Value::Integer(_) => Type::Integer,
            Value::Float(_) => Type::Float,
            Value::Time(_) => Type::Time,
            Value::Bytes(_) => Type::Bytes,
            Value::String(_) => Type::String,
            Value::Unicode(_) => Type::Unicode,
            Value::Uid(_) => Type::Uid,
        }
    }
}

/// A node in the staging tree accumulated by the [`Builder`](crate::builder::Builder)
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Entry {
    /// A primitive element holding a normalized datum
    Element(Value),
    /// A collection of child nodes; encodable only once `closed` is set
    Collection {
        kind: Collection,
        closed: bool,
        content: Vec<Entry>,
    },
}
