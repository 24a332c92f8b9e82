//! XDR serializers for the callback operations this engine issues.
//!
//! Each submodule encodes the argument body of one `nfs_cb_argop4`, opnum
//! included. [`compound`] frames them into a CB_COMPOUND request.

pub mod compound;
pub mod get_attr;
pub mod layout_recall;
pub mod notify_lock;
pub mod offload;
pub mod recall;
pub mod recall_any;
pub mod sequence;

use std::io;
use std::io::Write;

use crate::nfs4::{FileHandle, Stateid, NFS4_FHSIZE};
use crate::serializer::{array, u32, vec_max_size};

/// Serializes an `nfs_fh4` (length-prefixed opaque, at most [`NFS4_FHSIZE`] bytes).
pub fn file_handle(dest: &mut impl Write, fh: &FileHandle) -> io::Result<()> {
    vec_max_size(dest, &fh.0, NFS4_FHSIZE)
}

/// Serializes a `stateid4`: generation counter plus fixed opaque remainder.
pub fn stateid(dest: &mut impl Write, sid: &Stateid) -> io::Result<()> {
    u32(dest, sid.seqid)?;
    array(dest, sid.other)
}

/// Serializes an XDR `bitmap4`: word count followed by the words.
pub fn bitmap(dest: &mut impl Write, words: &[u32]) -> io::Result<()> {
    crate::serializer::usize_as_u32(dest, words.len())?;
    for word in words {
        u32(dest, *word)?;
    }
    Ok(())
}
