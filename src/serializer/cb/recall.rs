//! XDR serializer for CB_RECALL arguments (RFC 5661, 20.2).
//!
//! ```text
//! struct CB_RECALL4args {
//!     stateid4    stateid;
//!     bool        truncate;
//!     nfs_fh4     fh;
//! };
//! ```

use std::io;
use std::io::Write;

use crate::callback::RecallArgs;
use crate::nfs4::CbOpcode;
use crate::serializer::cb::{file_handle, stateid};
use crate::serializer::{bool, variant};

/// Serializes CB_RECALL arguments. `truncate` is never requested.
pub fn args(dest: &mut impl Write, arg: &RecallArgs) -> io::Result<()> {
    variant(dest, CbOpcode::Recall)?;
    stateid(dest, &arg.stateid)?;
    bool(dest, false)?;
    file_handle(dest, &arg.fh)
}
