//! XDR serializer for CB_LAYOUTRECALL arguments (RFC 5661, 20.3).
//!
//! ```text
//! struct layoutrecall_file4 {
//!     nfs_fh4     lor_fh;
//!     offset4     lor_offset;
//!     length4     lor_length;
//!     stateid4    lor_stateid;
//! };
//!
//! struct CB_LAYOUTRECALL4args {
//!     layouttype4     clora_type;
//!     layoutiomode4   clora_iomode;
//!     bool            clora_changed;
//!     layoutrecall4   clora_recall;
//! };
//! ```

use std::io;
use std::io::Write;

use crate::callback::LayoutRecallArgs;
use crate::nfs4::{CbOpcode, IOMODE_ANY, LAYOUTRECALL4_FILE, NFS4_MAX_UINT64};
use crate::serializer::cb::{file_handle, stateid};
use crate::serializer::{bool, u32, u64, variant};

/// Serializes CB_LAYOUTRECALL arguments: a whole-file recall for any I/O
/// mode, with `clora_changed` set.
pub fn args(dest: &mut impl Write, arg: &LayoutRecallArgs) -> io::Result<()> {
    variant(dest, CbOpcode::LayoutRecall)?;
    u32(dest, arg.layout_type)?;
    u32(dest, IOMODE_ANY)?;
    bool(dest, true)?;
    u32(dest, LAYOUTRECALL4_FILE)?;
    file_handle(dest, &arg.fh)?;
    u64(dest, 0)?;
    u64(dest, NFS4_MAX_UINT64)?;
    stateid(dest, &arg.stateid)
}
