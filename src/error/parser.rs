/*!
 Errors that can happen when parsing binary property list data.
*/

use std::{
    fmt::{Display, Formatter, Result},
    str::Utf8Error,
};

/// Errors that can happen when parsing binary property list data
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The stream does not begin with the `bplist` magic number
    InvalidMagic,
    /// A read extends past the end of the stream
    TruncatedInput(usize, usize),
    /// The offset table described by the trailer does not fit inside the stream
    InvalidOffsetTable,
    /// An object reference points outside the offset table
    InvalidObjectReference(usize),
    /// An object carries a tag byte this format does not define
    UnrecognizedTag(u8),
    /// A string object's payload is not valid UTF-8
    InvalidString(Utf8Error),
    /// A date object's seconds value is outside the representable range
    InvalidTimestamp,
    /// A handler callback stopped the decode
    Aborted(String),
}

impl Display for ParseError {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result {
        match self {
            ParseError::InvalidMagic => write!(fmt, "Invalid magic number!"),
            ParseError::TruncatedInput(idx, len) => {
                write!(fmt, "Index {idx:x} is outside of range {len:x}!")
            }
            ParseError::InvalidOffsetTable => write!(fmt, "Invalid offsets table!"),
            ParseError::InvalidObjectReference(id) => {
                write!(fmt, "Reference to unknown object {id}!")
            }
            ParseError::UnrecognizedTag(tag) => write!(fmt, "Unrecognized tag {tag:02x}!"),
            ParseError::InvalidString(why) => write!(fmt, "Failed to parse string: {why}"),
            ParseError::InvalidTimestamp => write!(fmt, "Timestamp is not valid!"),
            ParseError::Aborted(why) => write!(fmt, "Decode aborted by handler: {why}"),
        }
    }
}
