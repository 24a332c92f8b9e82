//! XDR serializer for CB_GETATTR arguments (RFC 5661, 20.1).
//!
//! ```text
//! struct CB_GETATTR4args {
//!     nfs_fh4     fh;
//!     bitmap4     attr_request;
//! };
//! ```
//!
//! The size and change attributes are the only ones guaranteed to be
//! serviced by the client.

use std::io;
use std::io::Write;

use crate::callback::GetAttrArgs;
use crate::nfs4::{
    CbOpcode, FATTR4_WORD0_CHANGE, FATTR4_WORD0_SIZE, FATTR4_WORD2_TIME_DELEG_ACCESS,
    FATTR4_WORD2_TIME_DELEG_MODIFY,
};
use crate::serializer::cb::{bitmap, file_handle};
use crate::serializer::variant;

/// Serializes CB_GETATTR arguments.
///
/// SIZE is always requested; CHANGE only while no modification has been
/// observed yet; the delegated timestamps only for delegations that carry
/// them.
pub fn args(dest: &mut impl Write, arg: &GetAttrArgs) -> io::Result<()> {
    let mut words = [0u32; 3];
    words[0] = FATTR4_WORD0_SIZE;
    if !arg.file_modified {
        words[0] |= FATTR4_WORD0_CHANGE;
    }
    let mut len = 1;
    if arg.deleg_timestamps {
        words[2] = FATTR4_WORD2_TIME_DELEG_ACCESS | FATTR4_WORD2_TIME_DELEG_MODIFY;
        len = 3;
    }

    variant(dest, CbOpcode::GetAttr)?;
    file_handle(dest, &arg.fh)?;
    bitmap(dest, &words[..len])
}
