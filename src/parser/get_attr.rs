//! Implements parsing for the CB_GETATTR success body.
//!
//! The client answers with an attribute bitmap, the encoded attribute length,
//! and the attributes themselves in bitmap order.

use std::io::Read;

use crate::nfs4::{
    Time, FATTR4_WORD0_CHANGE, FATTR4_WORD0_SIZE, FATTR4_WORD2_TIME_DELEG_ACCESS,
    FATTR4_WORD2_TIME_DELEG_MODIFY,
};
use crate::parser::primitive::{bitmap, i64, u32, u64};
use crate::parser::{Error, Result};

/// Attributes a client reports for a file it holds a delegation on.
///
/// Fields whose bitmap bit is absent from the reply stay zero.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DelegAttrs {
    pub change: u64,
    pub size: u64,
    pub atime: Time,
    pub mtime: Time,
}

/// Parses the reply attribute bitmap (up to three words).
pub fn attr_bitmap(src: &mut impl Read) -> Result<[u32; 3]> {
    bitmap::<3>(src)
}

/// Largest attribute payload the reply bitmap can legitimately describe.
pub fn max_attr_len(bitmap: &[u32; 3]) -> u32 {
    let mut len = 8 + 8;
    if bitmap[2] != 0 {
        len += (8 + 4) * 2;
    }
    len
}

/// Parses the attribute values selected by `bitmap`, in attribute order.
pub fn attrs(src: &mut impl Read, bitmap: &[u32; 3]) -> Result<DelegAttrs> {
    let mut out = DelegAttrs::default();
    if bitmap[0] & FATTR4_WORD0_CHANGE != 0 {
        out.change = u64(src)?;
    }
    if bitmap[0] & FATTR4_WORD0_SIZE != 0 {
        out.size = u64(src)?;
    }
    if bitmap[2] & FATTR4_WORD2_TIME_DELEG_ACCESS != 0 {
        out.atime = Time { seconds: i64(src)?, nseconds: u32(src)? };
    }
    if bitmap[2] & FATTR4_WORD2_TIME_DELEG_MODIFY != 0 {
        out.mtime = Time { seconds: i64(src)?, nseconds: u32(src)? };
    }
    Ok(out)
}

/// Parses the complete CB_GETATTR success body: bitmap, bounded attribute
/// length, then the attributes.
pub fn res_ok(src: &mut impl Read) -> Result<DelegAttrs> {
    let bitmap = attr_bitmap(src)?;
    let attr_len = u32(src)?;
    if attr_len > max_attr_len(&bitmap) {
        return Err(Error::MaxElemLimit);
    }
    attrs(src, &bitmap)
}
