//! XDR serializer for the CB_COMPOUND request envelope.
//!
//! ```text
//! struct CB_COMPOUND4args {
//!     utf8str_cs      tag;
//!     uint32_t        minorversion;
//!     uint32_t        callback_ident;
//!     nfs_cb_argop4   argarray<>;
//! };
//! ```
//!
//! The operation count is not known until every operation has been appended,
//! so [`header`] returns the byte offset of the count field and
//! [`patch_nops`] rewrites it afterwards.

use std::io::{self, Error, ErrorKind};

use crate::nfs4::MAX_BACK_CHANNEL_OPS;
use crate::serializer::{u32, vector};

/// CB_COMPOUND header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompoundHeader {
    /// Minor version of the compound: 0 or 1.
    pub minorversion: u32,
    /// Callback ident the client registered; meaningful for minorversion 0 only.
    pub ident: u32,
}

/// Writes the compound header with an empty tag and a zero operation count.
///
/// Returns the offset of the count field for later patching.
pub fn header(dest: &mut Vec<u8>, hdr: &CompoundHeader) -> io::Result<usize> {
    vector(dest, &[])?;
    u32(dest, hdr.minorversion)?;
    u32(dest, hdr.ident)?;
    let nops_at = dest.len();
    u32(dest, 0)?;
    Ok(nops_at)
}

/// Rewrites the operation count recorded by [`header`].
pub fn patch_nops(dest: &mut [u8], nops_at: usize, nops: u32) -> io::Result<()> {
    if nops as usize > MAX_BACK_CHANNEL_OPS {
        return Err(Error::new(ErrorKind::InvalidInput, "too many operations in compound"));
    }
    let field = dest
        .get_mut(nops_at..nops_at + 4)
        .ok_or(Error::new(ErrorKind::InvalidInput, "operation count offset out of range"))?;
    field.copy_from_slice(&nops.to_be_bytes());
    Ok(())
}
