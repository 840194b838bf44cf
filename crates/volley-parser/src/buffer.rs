//! Binary placeholders and the walker that finds them.
//!
//! A [`Buffer`] sits anywhere inside an event's arguments. On encode the
//! walker numbers every buffer in traversal order and pulls its bytes out
//! into a trailing binary frame; the JSON body then only carries
//! `{"_placeholder":true,"num":N}`. On decode the same walk puts the
//! bytes back by number.
//!
//! Rust has no runtime reflection, so values opt in through the
//! [`Attachments`] trait. Containers forward to their elements, leaves do
//! nothing, and structs list their fields with [`attachments!`](crate::attachments).
//!
//! Traversal order:
//!
//! - struct fields in the order given to `attachments!`
//! - sequence elements by index
//! - `BTreeMap` values in key order; `HashMap` values sorted by key

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{BuildHasher, Hash};

use bytes::Bytes;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ParserError;

// ---------------------------------------------------------------------------
// Buffer
// ---------------------------------------------------------------------------

/// Raw bytes embedded in event arguments.
///
/// Equality compares bytes only; the attachment number is wire
/// bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    data: Bytes,
    num: u64,
    is_binary: bool,
}

impl Buffer {
    /// Wraps raw bytes.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            num: 0,
            is_binary: false,
        }
    }

    /// The bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Consumes the buffer, returning its bytes.
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Attachment number, valid once the buffer is attached.
    pub fn num(&self) -> u64 {
        self.num
    }

    /// Returns `true` once the buffer travels as a binary attachment.
    pub fn is_attached(&self) -> bool {
        self.is_binary
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for Buffer {}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&'static [u8]> for Buffer {
    fn from(data: &'static [u8]) -> Self {
        Self::new(data)
    }
}

impl Serialize for Buffer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Buffer", 2)?;
        if self.is_binary {
            s.serialize_field("_placeholder", &true)?;
            s.serialize_field("num", &self.num)?;
        } else {
            s.serialize_field("type", "Buffer")?;
            s.serialize_field("data", &self.data[..])?;
        }
        s.end()
    }
}

impl<'de> Deserialize<'de> for Buffer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Accepts both the placeholder form and the inline
        // `{"type":"Buffer","data":[..]}` form.
        #[derive(Deserialize)]
        struct Wire {
            #[serde(rename = "_placeholder", default)]
            placeholder: bool,
            #[serde(default)]
            num: u64,
            #[serde(default)]
            data: Vec<u8>,
        }

        let wire = Wire::deserialize(deserializer)?;
        Ok(Self {
            data: Bytes::from(wire.data),
            num: wire.num,
            is_binary: wire.placeholder,
        })
    }
}

// ---------------------------------------------------------------------------
// Walker
// ---------------------------------------------------------------------------

enum Mode<'a> {
    Attach(Vec<Bytes>),
    Restore(&'a [Bytes]),
}

/// Visitor handed to [`Attachments::walk_buffers`].
///
/// Built by [`attach`] and [`restore`]; implementations only pass it
/// along to their children.
pub struct Walker<'a> {
    mode: Mode<'a>,
    error: Option<ParserError>,
}

impl<'a> Walker<'a> {
    /// Visits one placeholder.
    pub fn visit(&mut self, buffer: &mut Buffer) {
        match &mut self.mode {
            Mode::Attach(buffers) => {
                buffer.num = buffers.len() as u64;
                buffer.is_binary = true;
                buffers.push(buffer.data.clone());
            }
            Mode::Restore(attachments) => {
                if !buffer.is_binary {
                    return;
                }
                let found = usize::try_from(buffer.num)
                    .ok()
                    .and_then(|i| attachments.get(i));
                match found {
                    Some(data) => buffer.data = data.clone(),
                    None => {
                        let available = attachments.len();
                        // First failure wins.
                        self.error.get_or_insert(ParserError::UnknownAttachment {
                            num: buffer.num,
                            available,
                        });
                    }
                }
            }
        }
    }
}

/// Numbers every buffer in `value` and returns their bytes in order.
pub fn attach<T: Attachments + ?Sized>(value: &mut T) -> Vec<Bytes> {
    let mut walker = Walker {
        mode: Mode::Attach(Vec::new()),
        error: None,
    };
    value.walk_buffers(&mut walker);
    match walker.mode {
        Mode::Attach(buffers) => buffers,
        Mode::Restore(_) => Vec::new(),
    }
}

/// Puts `attachments` back into the placeholders of `value`.
pub fn restore<T: Attachments + ?Sized>(
    value: &mut T,
    attachments: &[Bytes],
) -> Result<(), ParserError> {
    let mut walker = Walker {
        mode: Mode::Restore(attachments),
        error: None,
    };
    value.walk_buffers(&mut walker);
    match walker.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

/// Values that may contain [`Buffer`]s.
pub trait Attachments {
    /// Passes every buffer reachable from `self` to the walker, in a
    /// fixed order.
    fn walk_buffers(&mut self, walker: &mut Walker<'_>);
}

/// Implements [`Attachments`] for a struct by walking the listed fields
/// in order, or for leaf types that never hold buffers.
///
/// ```
/// use volley_parser::{attachments, Buffer};
///
/// struct Upload {
///     name: String,
///     file: Buffer,
///     thumbs: Vec<Buffer>,
/// }
/// attachments!(Upload { name, file, thumbs });
///
/// struct Pair(Buffer, Buffer);
/// attachments!(Pair { 0, 1 });
///
/// #[derive(Clone, Copy)]
/// enum Mode { Fast, Slow }
/// attachments!(Mode);
/// ```
#[macro_export]
macro_rules! attachments {
    ($ty:ty { $($field:tt),* $(,)? }) => {
        impl $crate::Attachments for $ty {
            fn walk_buffers(&mut self, walker: &mut $crate::Walker<'_>) {
                let _ = &walker;
                $( $crate::Attachments::walk_buffers(&mut self.$field, walker); )*
            }
        }
    };
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::Attachments for $ty {
                fn walk_buffers(&mut self, _walker: &mut $crate::Walker<'_>) {}
            }
        )+
    };
}

attachments!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    String, str, &str, (), Bytes, serde_json::Value,
);

impl Attachments for Buffer {
    fn walk_buffers(&mut self, walker: &mut Walker<'_>) {
        walker.visit(self);
    }
}

impl<T: Attachments + ?Sized> Attachments for &mut T {
    fn walk_buffers(&mut self, walker: &mut Walker<'_>) {
        (**self).walk_buffers(walker);
    }
}

impl<T: Attachments + ?Sized> Attachments for Box<T> {
    fn walk_buffers(&mut self, walker: &mut Walker<'_>) {
        (**self).walk_buffers(walker);
    }
}

impl<T: Attachments> Attachments for Option<T> {
    fn walk_buffers(&mut self, walker: &mut Walker<'_>) {
        if let Some(v) = self {
            v.walk_buffers(walker);
        }
    }
}

impl<T: Attachments> Attachments for [T] {
    fn walk_buffers(&mut self, walker: &mut Walker<'_>) {
        for v in self {
            v.walk_buffers(walker);
        }
    }
}

impl<T: Attachments, const N: usize> Attachments for [T; N] {
    fn walk_buffers(&mut self, walker: &mut Walker<'_>) {
        self.as_mut_slice().walk_buffers(walker);
    }
}

impl<T: Attachments> Attachments for Vec<T> {
    fn walk_buffers(&mut self, walker: &mut Walker<'_>) {
        self.as_mut_slice().walk_buffers(walker);
    }
}

impl<T: Attachments> Attachments for VecDeque<T> {
    fn walk_buffers(&mut self, walker: &mut Walker<'_>) {
        for v in self {
            v.walk_buffers(walker);
        }
    }
}

impl<K, V: Attachments> Attachments for BTreeMap<K, V> {
    fn walk_buffers(&mut self, walker: &mut Walker<'_>) {
        for v in self.values_mut() {
            v.walk_buffers(walker);
        }
    }
}

impl<K, V, S> Attachments for HashMap<K, V, S>
where
    K: Ord + Hash + Eq,
    V: Attachments,
    S: BuildHasher,
{
    fn walk_buffers(&mut self, walker: &mut Walker<'_>) {
        let mut entries: Vec<(&K, &mut V)> = self.iter_mut().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (_, v) in entries {
            v.walk_buffers(walker);
        }
    }
}

macro_rules! tuple_attachments {
    ($($name:ident . $idx:tt),+) => {
        impl<$($name: Attachments),+> Attachments for ($($name,)+) {
            fn walk_buffers(&mut self, walker: &mut Walker<'_>) {
                $( self.$idx.walk_buffers(walker); )+
            }
        }
    };
}

tuple_attachments!(A.0);
tuple_attachments!(A.0, B.1);
tuple_attachments!(A.0, B.1, C.2);
tuple_attachments!(A.0, B.1, C.2, D.3);
tuple_attachments!(A.0, B.1, C.2, D.3, E.4);
tuple_attachments!(A.0, B.1, C.2, D.3, E.4, F.5);
