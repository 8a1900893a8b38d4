/*!
 Contains logic to stage a binary property list object graph and serialize it.

 A [`Builder`] accumulates values incrementally: primitive elements are added
 with [`Builder::add_value`], collections are delimited with
 [`Builder::open`] and [`Builder::close`] (or the scoped
 [`Builder::collection`]). Structural mistakes, such as closing collections
 out of order or leaving a dictionary with an unpaired key, are rejected as
 early as possible.

 Errors are sticky: once an operation fails, every subsequent operation
 returns the same [`BuildError`] until [`Builder::reset`] is called, so a
 caller cannot keep building on top of an invalid graph.
*/

use std::io::Write;

use crate::{
    encoder,
    error::builder::BuildError,
    models::{Collection, Entry, Type, Value},
};

/// Accumulates values to build a binary property list
///
/// [`Builder::default`] is ready for use. Add elements and collections, then
/// serialize the finished graph with [`Builder::write_to`].
#[derive(Debug, Default)]
pub struct Builder {
    /// Staged entries; elements and closed collections awaiting a parent
    stack: Vec<Entry>,
    /// Total staged node count, the pre-dedup upper bound on object ids
    nobj: usize,
    /// The sticky error, if any operation has failed
    err: Option<BuildError>,
}

impl Builder {
    /// Construct a new empty property list builder
    pub fn new() -> Self {
        Self::default()
    }

    /// The error that caused the last operation to fail, or `None`
    ///
    /// Any error causes all subsequent operations on the builder to fail with
    /// the same error until [`Builder::reset`] is called.
    pub fn last_error(&self) -> Option<&BuildError> {
        self.err.as_ref()
    }

    /// Discard all staged data and clear any sticky error
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Add a single primitive element to the property list
    ///
    /// The datum is validated against the type's value contract and
    /// normalized to its canonical [`Value`] variant. Some permissive inputs
    /// are accepted: [`Type::Bytes`] takes string data, [`Type::Unicode`]
    /// takes a string (converted to UTF-16 units), [`Type::String`] takes
    /// UTF-16 units that form valid text, and [`Type::Uid`] takes raw bytes.
    pub fn add_value(&mut self, typ: Type, value: Value) -> Result<(), BuildError> {
        self.check()?;
        let got = value.plist_type();
        let canonical = match (typ, value) {
            (Type::Null, Value::Null) => Value::Null,
            (Type::Bool, datum @ Value::Bool(_)) => datum,
            (Type::Integer, datum @ Value::Integer(_)) => datum,
            (Type::Float, datum @ Value::Float(_)) => datum,
            (Type::Time, datum @ Value::Time(_)) => datum,
            (Type::Bytes, Value::Bytes(data) | Value::Uid(data)) => Value::Bytes(data),
            (Type::Bytes, Value::String(text)) => Value::Bytes(text.into_bytes()),
            (Type::String, datum @ Value::String(_)) => datum,
            (Type::String, Value::Unicode(units)) => match String::from_utf16(&units) {
                Ok(text) => Value::String(text),
                Err(_) => return Err(self.fail(BuildError::InvalidValue(typ, got))),
            },
            (Type::Unicode, datum @ Value::Unicode(_)) => datum,
            (Type::Unicode, Value::String(text)) => Value::Unicode(text.encode_utf16().collect()),
            (Type::Uid, Value::Uid(data) | Value::Bytes(data)) => Value::Uid(data),
            (typ, _) => return Err(self.fail(BuildError::InvalidValue(typ, got))),
        };
        self.stack.push(Entry::Element(canonical));
        self.nobj += 1;
        Ok(())
    }

    /// Open a new empty collection of the given kind
    ///
    /// Elements and collections staged afterwards become its children once a
    /// matching [`Builder::close`] succeeds.
    pub fn open(&mut self, kind: Collection) -> Result<(), BuildError> {
        self.check()?;
        self.stack.push(Entry::Collection {
            kind,
            closed: false,
            content: vec![],
        });
        self.nobj += 1;
        Ok(())
    }

    /// Close the innermost open collection, which must be of the given kind
    ///
    /// Everything staged since the matching [`Builder::open`] becomes the
    /// collection's ordered content. For [`Collection::Dict`], the content is
    /// interpreted as alternating key/value pairs and must have even length.
    pub fn close(&mut self, kind: Collection) -> Result<(), BuildError> {
        self.check()?;

        // Search back for the innermost open collection; elements and
        // already-closed collections in between are its pending content.
        let mut top = self.stack.len();
        while top > 0 {
            match &self.stack[top - 1] {
                Entry::Collection {
                    kind: open,
                    closed: false,
                    ..
                } => {
                    let open = *open;
                    if open == kind {
                        break;
                    }
                    return Err(self.fail(BuildError::CloseMismatch(open, kind)));
                }
                _ => top -= 1,
            }
        }
        if top == 0 {
            return Err(self.fail(BuildError::CloseUnopened(kind)));
        }

        let children = self.stack.split_off(top);
        if kind == Collection::Dict && children.len() % 2 != 0 {
            return Err(self.fail(BuildError::OddDictionaryArity(children.len())));
        }

        match &mut self.stack[top - 1] {
            Entry::Collection {
                closed, content, ..
            } => {
                *content = children;
                *closed = true;
            }
            Entry::Element(_) => unreachable!(), // the loop above only stops on an open collection
        }
        Ok(())
    }

    /// Open a collection, populate it with `f`, and close it again
    ///
    /// The collection is closed on every exit path, including when `f` fails.
    /// It is safe and valid for `f` to open further nested collections.
    ///
    /// # Example
    ///
    /// ```
    /// use bplist::{builder::Builder, models::{Collection, Type, Value}};
    ///
    /// let mut builder = Builder::new();
    /// builder.collection(Collection::Array, |b| {
    ///     b.add_value(Type::String, Value::String("foo".to_string()))?;
    ///     b.add_value(Type::String, Value::String("bar".to_string()))
    /// }).unwrap();
    /// ```
    pub fn collection<F>(&mut self, kind: Collection, f: F) -> Result<(), BuildError>
    where
        F: FnOnce(&mut Builder) -> Result<(), BuildError>,
    {
        self.open(kind)?;
        if let Err(why) = f(self) {
            let _ = self.close(kind);
            return Err(self.fail(why));
        }
        self.close(kind)
    }

    /// Encode the property list and write it in binary form to `w`
    ///
    /// Fails with [`BuildError::IncompleteGraph`] unless exactly one fully
    /// closed root node is staged. On success, returns the total number of
    /// bytes written.
    pub fn write_to<W: Write>(&mut self, w: &mut W) -> Result<u64, BuildError> {
        self.check()?;
        let complete = match self.stack.as_slice() {
            [Entry::Element(_)] => true,
            [Entry::Collection { closed, .. }] => *closed,
            _ => false,
        };
        if !complete {
            let pending = self.stack.len();
            return Err(self.fail(BuildError::IncompleteGraph(pending)));
        }

        match encoder::write_plist(&self.stack[0], self.nobj, w) {
            Ok(total) => Ok(total),
            Err(why) => Err(self.fail(why)),
        }
    }

    /// Short-circuit with the sticky error, if one is set
    fn check(&self) -> Result<(), BuildError> {
        match &self.err {
            Some(why) => Err(why.clone()),
            None => Ok(()),
        }
    }

    /// Record `why` as the sticky error and hand it back
    fn fail(&mut self, why: BuildError) -> BuildError {
        self.err = Some(why.clone());
        why
    }
}

#[cfg(test)]
mod builder_tests {
    use crate::builder::Builder;
    use crate::error::builder::BuildError;
    use crate::models::{Collection, Type, Value};

    fn string(text: &str) -> Value {
        Value::String(text.to_string())
    }

    #[test]
    fn close_of_unopened_collection_fails() {
        let mut builder = Builder::new();

        let result = builder.close(Collection::Array);

        assert_eq!(result, Err(BuildError::CloseUnopened(Collection::Array)));
    }

    #[test]
    fn close_of_mismatched_kind_fails() {
        let mut builder = Builder::new();
        builder.open(Collection::Array).unwrap();

        let result = builder.close(Collection::Dict);

        assert_eq!(
            result,
            Err(BuildError::CloseMismatch(Collection::Array, Collection::Dict))
        );
    }

    #[test]
    fn inner_collection_must_close_first() {
        let mut builder = Builder::new();
        builder.open(Collection::Dict).unwrap();
        builder.add_value(Type::String, string("key")).unwrap();
        builder.open(Collection::Array).unwrap();

        let result = builder.close(Collection::Dict);

        assert_eq!(
            result,
            Err(BuildError::CloseMismatch(Collection::Array, Collection::Dict))
        );
    }

    #[test]
    fn odd_dictionary_fails() {
        let mut builder = Builder::new();
        builder.open(Collection::Dict).unwrap();
        builder.add_value(Type::String, string("orphan key")).unwrap();

        let result = builder.close(Collection::Dict);

        assert_eq!(result, Err(BuildError::OddDictionaryArity(1)));
    }

    #[test]
    fn invalid_datum_fails() {
        let mut builder = Builder::new();

        let result = builder.add_value(Type::Bool, Value::Integer(1));

        assert_eq!(
            result,
            Err(BuildError::InvalidValue(Type::Bool, Type::Integer))
        );
    }

    #[test]
    fn bytes_accept_string_datum() {
        let mut builder = Builder::new();

        builder.add_value(Type::Bytes, string("raw")).unwrap();

        let mut out = vec![];
        builder.write_to(&mut out).unwrap();
        // First object carries the data tag, not the string tag
        assert_eq!(out[8], 0x43);
    }

    #[test]
    fn errors_are_sticky_until_reset() {
        let mut builder = Builder::new();
        let first = builder.close(Collection::Set);
        assert_eq!(first, Err(BuildError::CloseUnopened(Collection::Set)));

        // Every later operation repeats the same error.
        assert_eq!(
            builder.add_value(Type::Integer, Value::Integer(1)),
            Err(BuildError::CloseUnopened(Collection::Set))
        );
        assert_eq!(
            builder.open(Collection::Array),
            Err(BuildError::CloseUnopened(Collection::Set))
        );
        assert_eq!(
            builder.last_error(),
            Some(&BuildError::CloseUnopened(Collection::Set))
        );

        builder.reset();
        assert_eq!(builder.last_error(), None);
        builder.add_value(Type::Integer, Value::Integer(1)).unwrap();
    }

    #[test]
    fn write_requires_single_root() {
        let mut builder = Builder::new();
        builder.add_value(Type::Integer, Value::Integer(1)).unwrap();
        builder.add_value(Type::Integer, Value::Integer(2)).unwrap();

        let result = builder.write_to(&mut vec![]);

        assert_eq!(result, Err(BuildError::IncompleteGraph(2)));
    }

    #[test]
    fn write_requires_closed_root() {
        let mut builder = Builder::new();
        builder.open(Collection::Array).unwrap();

        let result = builder.write_to(&mut vec![]);

        assert_eq!(result, Err(BuildError::IncompleteGraph(1)));
    }

    #[test]
    fn write_requires_any_root() {
        let mut builder = Builder::new();

        let result = builder.write_to(&mut vec![]);

        assert_eq!(result, Err(BuildError::IncompleteGraph(0)));
    }

    #[test]
    fn scoped_collection_closes_on_success() {
        let mut builder = Builder::new();
        builder
            .collection(Collection::Dict, |b| {
                b.add_value(Type::String, string("key"))?;
                b.add_value(Type::Integer, Value::Integer(7))
            })
            .unwrap();

        assert!(builder.write_to(&mut vec![]).is_ok());
    }

    #[test]
    fn scoped_collection_records_population_failure() {
        let mut builder = Builder::new();
        let result = builder.collection(Collection::Array, |b| {
            b.add_value(Type::Bool, Value::Null)
        });

        assert_eq!(result, Err(BuildError::InvalidValue(Type::Bool, Type::Null)));
        assert_eq!(
            builder.last_error(),
            Some(&BuildError::InvalidValue(Type::Bool, Type::Null))
        );
    }

    #[test]
    fn golden_cookie_dictionary() {
        let mut builder = Builder::new();
        builder
            .collection(Collection::Dict, |b| {
                b.add_value(Type::String, string("NSHTTPCookieAcceptPolicy"))?;
                b.add_value(Type::Integer, Value::Integer(2))
            })
            .unwrap();

        let mut out = vec![];
        let total = builder.write_to(&mut out).unwrap();

        let mut want = vec![];
        want.extend_from_slice(b"bplist00");
        // Object 0: the key, an ASCII string with an extended length prefix
        want.extend_from_slice(&[0x5f, 0x10, 0x18]);
        want.extend_from_slice(b"NSHTTPCookieAcceptPolicy");
        // Object 1: the value, a one-byte integer
        want.extend_from_slice(&[0x10, 0x02]);
        // Object 2: the dictionary, key ref then value ref
        want.extend_from_slice(&[0xd1, 0x00, 0x01]);
        // Offset table: objects at file offsets 8, 35, 37
        want.extend_from_slice(&[0x08, 0x23, 0x25]);
        // Trailer: widths 1/1, 3 objects, root id 2, table at 40
        want.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0x01, 0x01]);
        want.extend_from_slice(&3u64.to_be_bytes());
        want.extend_from_slice(&2u64.to_be_bytes());
        want.extend_from_slice(&40u64.to_be_bytes());

        assert_eq!(out, want);
        assert_eq!(total, want.len() as u64);
    }

    #[test]
    fn repeated_values_are_deduplicated() {
        let mut builder = Builder::new();
        builder
            .collection(Collection::Array, |b| {
                b.add_value(Type::String, string("x"))?;
                b.add_value(Type::String, string("x"))?;
                b.add_value(Type::String, string("x"))
            })
            .unwrap();

        let mut out = vec![];
        builder.write_to(&mut out).unwrap();

        let mut want = vec![];
        want.extend_from_slice(b"bplist00");
        // Object 0: "x", emitted once
        want.extend_from_slice(&[0x51, b'x']);
        // Object 1: the array, three references to object 0
        want.extend_from_slice(&[0xa3, 0x00, 0x00, 0x00]);
        // Offset table and trailer cover the two distinct objects
        want.extend_from_slice(&[0x08, 0x0a]);
        want.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0x01, 0x01]);
        want.extend_from_slice(&2u64.to_be_bytes());
        want.extend_from_slice(&1u64.to_be_bytes());
        want.extend_from_slice(&14u64.to_be_bytes());

        assert_eq!(out, want);
    }

    #[test]
    fn identical_collections_get_fresh_ids() {
        let mut builder = Builder::new();
        builder
            .collection(Collection::Array, |b| {
                for _ in 0..2 {
                    b.collection(Collection::Array, |inner| {
                        inner.add_value(Type::String, string("a"))
                    })?;
                }
                Ok(())
            })
            .unwrap();

        let mut out = vec![];
        builder.write_to(&mut out).unwrap();

        // "a" dedups, but both inner arrays and the outer one are distinct:
        // the trailer's object count is 4.
        let trailer = &out[out.len() - 32..];
        assert_eq!(u64::from_be_bytes(trailer[8..16].try_into().unwrap()), 4);
    }

    #[test]
    fn three_hundred_objects_use_two_byte_references() {
        let mut builder = Builder::new();
        builder
            .collection(Collection::Array, |b| {
                for n in 0..300 {
                    b.add_value(Type::Integer, Value::Integer(n))?;
                }
                Ok(())
            })
            .unwrap();

        let mut out = vec![];
        builder.write_to(&mut out).unwrap();

        let trailer = &out[out.len() - 32..];
        assert_eq!(trailer[6], 2, "offset width");
        assert_eq!(trailer[7], 2, "reference width");
        assert_eq!(u64::from_be_bytes(trailer[8..16].try_into().unwrap()), 301);
    }

    #[test]
    fn string_tags_follow_content() {
        // ASCII narrow, UTF-8 narrow, and explicit wide text use 0x5_, 0x7_,
        // and 0x6_ tags respectively.
        for (typ, value, tag) in [
            (Type::String, string("abc"), 0x53),
            (Type::String, string("héllo"), 0x76),
            (Type::Unicode, Value::Unicode(vec![0x0068, 0x0069]), 0x62),
        ] {
            let mut builder = Builder::new();
            builder.add_value(typ, value).unwrap();
            let mut out = vec![];
            builder.write_to(&mut out).unwrap();
            assert_eq!(out[8], tag);
        }
    }
}
