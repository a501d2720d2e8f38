//! Fixed-width placeholders for the signature `/ByteRange` and `/Contents`.
//!
//! The signature dictionary is serialized before any offset is known. The
//! unknown values are written as PDF names of a carefully chosen length, and
//! right after serialization they are overwritten, in place, by ASCII zeros of
//! the exact same byte length. Nothing after that point may change the length
//! of the file, so every later edit is a same-size overwrite too.

use std::ops::Range;

use lopdf::Object;
use regex::bytes::{Captures, Regex};

use crate::{Malformed, Result};

/// Number of digits reserved for each of the three unknown `/ByteRange`
/// values. Enough for documents up to 9_999_999_999 bytes.
pub const SLOT_WIDTH: usize = 10;

/// Name written in place of an unresolved slot. Its serialized form (`/` plus
/// the name) is one byte wider than the digits, which leaves room for the
/// separator lopdf may elide between names.
const PENDING_SLOT_NAME: &[u8; SLOT_WIDTH] = b"**********";

const CONTENTS_SENTINEL_PREFIX: &[u8] = b"PendingSignatureContents";

/// Smallest `/Contents` width that still fits the sentinel name.
pub const MIN_CONTENTS_SENTINEL_WIDTH: usize = CONTENTS_SENTINEL_PREFIX.len();

lazy_static::lazy_static! {
    static ref PENDING_BYTE_RANGE: Regex =
        Regex::new(r"/ByteRange\s*(\[\s*0\s*/\*{10}\s*/\*{10}\s*/\*{10}\s*\])").unwrap();
    // `/Contents` is inserted right after `/ByteRange`, and lopdf keeps the
    // insertion order of dictionary keys.
    static ref RESOLVED_PLACEHOLDER: Regex = Regex::new(
        r"/ByteRange\s*(\[\s*0\s+0{10}\s+0{10}\s+0{10}\s*\])\s*/Contents\s*(<0+>)"
    )
    .unwrap();
}

/// One entry of the `/ByteRange` array while the signature dictionary is
/// being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRangeSlot {
    Known(u64),
    Pending,
}

impl ByteRangeSlot {
    fn to_object(self) -> Object {
        match self {
            ByteRangeSlot::Known(value) => Object::Integer(value as i64),
            ByteRangeSlot::Pending => Object::Name(PENDING_SLOT_NAME.to_vec()),
        }
    }
}

/// The `/ByteRange` array as it is handed to the serializer: the first span
/// always starts at 0, everything else is pending.
pub fn pending_byte_range() -> Object {
    use ByteRangeSlot::*;

    Object::Array(
        [Known(0), Pending, Pending, Pending]
            .into_iter()
            .map(ByteRangeSlot::to_object)
            .collect(),
    )
}

/// A name whose serialized form is exactly as long as a `<...>` hex literal
/// of `hex_width` digits.
pub fn contents_sentinel(hex_width: usize) -> Object {
    Object::Name(contents_sentinel_name(hex_width))
}

fn contents_sentinel_name(hex_width: usize) -> Vec<u8> {
    // "/" + name must match "<" + digits + ">".
    let mut name = CONTENTS_SENTINEL_PREFIX.to_vec();
    name.resize(hex_width + 1, b'X');
    name
}

/// Replaces the serialized sentinels of a freshly written document by the
/// zero-filled placeholders the signer looks for.
pub fn resolve_pending(pdf: &mut [u8], hex_width: usize) -> Result<()> {
    let byte_range = group_range(&unique_match(&PENDING_BYTE_RANGE, pdf)?, 1)?;
    write_padded(
        &mut pdf[byte_range],
        format!("[0 {0} {0} {0}]", "0".repeat(SLOT_WIDTH)).as_bytes(),
    )?;

    let mut sentinel = vec![b'/'];
    sentinel.extend(contents_sentinel_name(hex_width));
    let start = {
        let mut found = find_all(pdf, &sentinel);
        match (found.next(), found.next()) {
            (Some(start), None) => start,
            (None, _) => return Err(Malformed::MissingPlaceholder.into()),
            (Some(_), Some(_)) => return Err(Malformed::AmbiguousPlaceholder.into()),
        }
    };

    let contents = &mut pdf[start..start + sentinel.len()];
    contents.fill(b'0');
    contents[0] = b'<';
    contents[sentinel.len() - 1] = b'>';

    Ok(())
}

/// Location of the zero-filled signature placeholder inside a serialized
/// document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePlaceholder {
    /// The `[...]` text of the `/ByteRange` array.
    pub byte_range: Range<usize>,
    /// The `<...>` hex literal of `/Contents`, delimiters included.
    pub contents: Range<usize>,
}

impl SignaturePlaceholder {
    /// Finds the single unsigned placeholder of the document: a zero-filled
    /// `/ByteRange` directly followed by a zero-filled `/Contents`.
    pub fn locate(pdf: &[u8]) -> Result<Self> {
        let captures = unique_match(&RESOLVED_PLACEHOLDER, pdf)?;
        Ok(Self {
            byte_range: group_range(&captures, 1)?,
            contents: group_range(&captures, 2)?,
        })
    }

    /// Number of hex digits reserved for the signature.
    pub fn hex_capacity(&self) -> usize {
        self.contents.len() - 2
    }

    /// The resolved `[start1, length1, start2, length2]` for a file of
    /// `file_len` bytes.
    pub fn byte_range_values(&self, file_len: usize) -> [usize; 4] {
        [
            0,
            self.contents.start,
            self.contents.end,
            file_len - self.contents.end,
        ]
    }

    /// Writes the resolved `/ByteRange` over the placeholder digits.
    pub fn write_byte_range(&self, pdf: &mut [u8]) -> Result<[usize; 4]> {
        let values = self.byte_range_values(pdf.len());
        let text = format!(
            "[{} {} {} {}]",
            values[0], values[1], values[2], values[3]
        );
        write_padded(&mut pdf[self.byte_range.clone()], text.as_bytes())?;
        Ok(values)
    }

    /// The bytes covered by the signature: everything but the `/Contents`
    /// literal.
    pub fn signed_message(&self, pdf: &[u8]) -> Vec<u8> {
        let mut message = Vec::with_capacity(pdf.len() - self.contents.len());
        message.extend_from_slice(&pdf[..self.contents.start]);
        message.extend_from_slice(&pdf[self.contents.end..]);
        message
    }
}

/// Overwrites `region` with `text`, filling the rest with spaces.
fn write_padded(region: &mut [u8], text: &[u8]) -> Result<()> {
    if text.len() > region.len() {
        return Err(Malformed::ByteRangeOverflow.into());
    }
    region[..text.len()].copy_from_slice(text);
    region[text.len()..].fill(b' ');
    Ok(())
}

/// The only match of `regex`.
fn unique_match<'h>(regex: &Regex, haystack: &'h [u8]) -> Result<Captures<'h>> {
    let mut matches = regex.captures_iter(haystack);
    match (matches.next(), matches.next()) {
        (Some(captures), None) => Ok(captures),
        (None, _) => Err(Malformed::MissingPlaceholder.into()),
        (Some(_), Some(_)) => Err(Malformed::AmbiguousPlaceholder.into()),
    }
}

fn group_range(captures: &Captures, group: usize) -> Result<Range<usize>> {
    captures
        .get(group)
        .map(|m| m.range())
        .ok_or_else(|| Malformed::MissingPlaceholder.into())
}

fn find_all<'a>(haystack: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(move |(_, window)| *window == needle)
        .map(|(pos, _)| pos)
}
