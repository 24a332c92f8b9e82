//! XDR serializer for CB_NOTIFY_LOCK arguments (RFC 5661, 20.11).
//!
//! ```text
//! struct CB_NOTIFY_LOCK4args {
//!     nfs_fh4         cnla_fh;
//!     lock_owner4     cnla_lock_owner;
//! };
//! ```

use std::io;
use std::io::Write;

use crate::callback::NotifyLockArgs;
use crate::nfs4::CbOpcode;
use crate::serializer::cb::file_handle;
use crate::serializer::{array, variant, vector};

/// Serializes CB_NOTIFY_LOCK arguments. The lock owner is the 8-byte client
/// id followed by the owner's opaque name.
pub fn args(dest: &mut impl Write, arg: &NotifyLockArgs) -> io::Result<()> {
    variant(dest, CbOpcode::NotifyLock)?;
    file_handle(dest, &arg.fh)?;
    array(dest, arg.clientid.0)?;
    vector(dest, &arg.owner)
}
