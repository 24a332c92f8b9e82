//! XDR serializer for CB_OFFLOAD arguments (RFC 7862, 15.1).
//!
//! ```text
//! struct write_response4 {
//!     stateid4    wr_callback_id<1>;
//!     length4     wr_count;
//!     stable_how4 wr_committed;
//!     verifier4   wr_writeverf;
//! };
//!
//! union offload_info4 switch (nfsstat4 coa_status) {
//! case NFS4_OK:
//!     write_response4 coa_resok4;
//! default:
//!     length4         coa_bytes_copied;
//! };
//!
//! struct CB_OFFLOAD4args {
//!     nfs_fh4         coa_fh;
//!     stateid4        coa_stateid;
//!     offload_info4   coa_offload_info;
//! };
//! ```

use std::io;
use std::io::Write;

use crate::callback::{OffloadArgs, OffloadInfo};
use crate::nfs4::{nfsstat, CbOpcode};
use crate::serializer::cb::{file_handle, stateid};
use crate::serializer::{array, u32, u64, usize_as_u32, variant};

/// Serializes the `offload_info4` union.
///
/// The failed arm always reports zero bytes copied: whenever any bytes were
/// written the completion is reported as a success.
fn offload_info(dest: &mut impl Write, info: &OffloadInfo) -> io::Result<()> {
    match info {
        OffloadInfo::Complete(resp) => {
            u32(dest, nfsstat::NFS4_OK)?;
            usize_as_u32(dest, 0)?;
            u64(dest, resp.bytes_written)?;
            variant(dest, resp.committed)?;
            array(dest, resp.verifier.0)
        }
        OffloadInfo::Failed(status) => {
            u32(dest, *status)?;
            u64(dest, 0)
        }
    }
}

/// Serializes CB_OFFLOAD arguments.
pub fn args(dest: &mut impl Write, arg: &OffloadArgs) -> io::Result<()> {
    variant(dest, CbOpcode::Offload)?;
    file_handle(dest, &arg.fh)?;
    stateid(dest, &arg.stateid)?;
    offload_info(dest, &arg.info)
}
