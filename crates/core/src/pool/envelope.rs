//! Framing of stored payloads.
//!
//! Every payload starts with a marker byte. [`BARE`] is followed directly
//! by the marshalled value. [`WITH_METADATA`] is followed by a header and
//! [`HEADER_END`], then the value:
//!
//! ```text
//! 0x9D | expiry f64 LE | ctime_ms u32 LE | tag count u16 LE | (len u16 LE, tag)* | 0x5F | value
//! ```
//!
//! An expiry of `0.0` and a ctime of `0` mean "not recorded".

use std::collections::BTreeSet;

use cachette_domain::ItemMetadata;

use crate::ports::StoreError;

pub const BARE: u8 = 0x00;
pub const WITH_METADATA: u8 = 0x9D;
pub const HEADER_END: u8 = 0x5F;

/// Frame a marshalled value with its metadata.
pub fn encode(metadata: &ItemMetadata, value: &[u8]) -> Vec<u8> {
    if metadata.is_empty() {
        let mut out = Vec::with_capacity(value.len() + 1);
        out.push(BARE);
        out.extend_from_slice(value);
        return out;
    }

    let tags: Vec<&[u8]> = metadata
        .tags
        .iter()
        .map(String::as_bytes)
        .filter(|t| u16::try_from(t.len()).is_ok())
        .take(usize::from(u16::MAX))
        .collect();
    let tag_bytes: usize = tags.iter().map(|t| t.len() + 2).sum();
    let mut out = Vec::with_capacity(1 + 8 + 4 + 2 + tag_bytes + 1 + value.len());
    out.push(WITH_METADATA);
    out.extend_from_slice(&metadata.expiry.unwrap_or(0.0).to_le_bytes());
    out.extend_from_slice(&metadata.ctime_ms.unwrap_or(0).to_le_bytes());
    out.extend_from_slice(&u16::try_from(tags.len()).unwrap_or(u16::MAX).to_le_bytes());
    for tag in tags {
        out.extend_from_slice(&u16::try_from(tag.len()).unwrap_or(u16::MAX).to_le_bytes());
        out.extend_from_slice(tag);
    }
    out.push(HEADER_END);
    out.extend_from_slice(value);
    out
}

/// Split a stored payload into its metadata and marshalled value.
///
/// # Errors
///
/// [`StoreError::Corrupt`] for an unknown marker or a truncated header.
pub fn decode(payload: &[u8]) -> Result<(ItemMetadata, &[u8]), StoreError> {
    match payload.split_first() {
        Some((&BARE, value)) => Ok((ItemMetadata::default(), value)),
        Some((&WITH_METADATA, rest)) => decode_header(rest),
        Some((marker, _)) => {
            Err(StoreError::Corrupt(format!("unknown payload marker 0x{marker:02x}")))
        }
        None => Err(StoreError::Corrupt("empty payload".to_string())),
    }
}

fn decode_header(bytes: &[u8]) -> Result<(ItemMetadata, &[u8]), StoreError> {
    let mut cursor = Cursor { bytes };
    let expiry = f64::from_le_bytes(cursor.take_array()?);
    let ctime = u32::from_le_bytes(cursor.take_array()?);
    let count = u16::from_le_bytes(cursor.take_array()?);

    let mut tags = BTreeSet::new();
    for _ in 0..count {
        let len = u16::from_le_bytes(cursor.take_array()?);
        let raw = cursor.take(usize::from(len))?;
        let tag = std::str::from_utf8(raw)
            .map_err(|e| StoreError::Corrupt(format!("tag is not UTF-8: {e}")))?;
        tags.insert(tag.to_string());
    }
    if cursor.take(1)? != [HEADER_END] {
        return Err(StoreError::Corrupt("missing metadata terminator".to_string()));
    }

    let metadata = ItemMetadata {
        expiry: (expiry.is_finite() && expiry > 0.0).then_some(expiry),
        ctime_ms: (ctime > 0).then_some(ctime),
        tags,
    };
    Ok((metadata, cursor.bytes))
}

struct Cursor<'a> {
    bytes: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], StoreError> {
        if self.bytes.len() < n {
            return Err(StoreError::Corrupt("truncated metadata header".to_string()));
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], StoreError> {
        let mut out = [0_u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}
