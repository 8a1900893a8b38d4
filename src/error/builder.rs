/*!
 Errors that can happen when staging or serializing a binary property list.
*/

use std::fmt::{Display, Formatter, Result};

use crate::models::{Collection, Type};

/// Errors that can happen when staging or serializing a binary property list
///
/// Once any of these occurs, the originating [`Builder`](crate::builder::Builder)
/// is stuck: every subsequent operation returns the same error until
/// [`reset`](crate::builder::Builder::reset) is called.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
    /// The supplied value does not satisfy the value contract of the requested type
    InvalidValue(Type, Type),
    /// The innermost open collection is of a different kind than the one being closed
    CloseMismatch(Collection, Collection),
    /// There is no open collection to close
    CloseUnopened(Collection),
    /// A dictionary was closed with an odd number of children
    OddDictionaryArity(usize),
    /// Serialization was requested without exactly one fully-closed root node
    IncompleteGraph(usize),
    /// An encoded object id has no recorded offset; indicates an encoder defect
    MissingOffset(usize),
    /// The output sink failed mid-write
    Write(String),
}

impl Display for BuildError {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result {
        match self {
            BuildError::InvalidValue(want, got) => {
                write!(fmt, "Invalid {got} datum for element of type {want}!")
            }
            BuildError::CloseMismatch(open, requested) => {
                write!(fmt, "Cannot close {requested}: innermost open collection is a {open}!")
            }
            BuildError::CloseUnopened(kind) => write!(fmt, "Close of unopened {kind}!"),
            BuildError::OddDictionaryArity(len) => {
                write!(fmt, "Dictionary has {len} children; missing a value!")
            }
            BuildError::IncompleteGraph(len) => {
                write!(fmt, "Have {len} pending elements, want 1 closed root!")
            }
            BuildError::MissingOffset(id) => write!(fmt, "Object {id} is missing an offset!"),
            BuildError::Write(why) => write!(fmt, "Failed to write property list: {why}"),
        }
    }
}
