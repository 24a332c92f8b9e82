//! XDR serializer for CB_SEQUENCE arguments.
//!
//! ```text
//! struct CB_SEQUENCE4args {
//!     sessionid4              csa_sessionid;
//!     sequenceid4             csa_sequenceid;
//!     slotid4                 csa_slotid;
//!     slotid4                 csa_highest_slotid;
//!     bool                    csa_cachethis;
//!     referring_call_list4    csa_referring_call_lists<>;
//! };
//! ```

use std::io;
use std::io::Write;

use crate::callback::ReferringCallList;
use crate::nfs4::{CbOpcode, SessionId};
use crate::serializer::{array, bool, u32, usize_as_u32, variant};

/// Arguments for one CB_SEQUENCE operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceArgs<'a> {
    pub sessionid: &'a SessionId,
    pub sequenceid: u32,
    pub slotid: u32,
    pub highest_slotid: u32,
    pub referring: &'a [ReferringCallList],
}

/// Serializes CB_SEQUENCE arguments. The server never asks the client to
/// cache the reply, so `csa_cachethis` is always false.
pub fn args(dest: &mut impl Write, arg: &SequenceArgs<'_>) -> io::Result<()> {
    variant(dest, CbOpcode::Sequence)?;
    array(dest, arg.sessionid.0)?;
    u32(dest, arg.sequenceid)?;
    u32(dest, arg.slotid)?;
    u32(dest, arg.highest_slotid)?;
    bool(dest, false)?;
    usize_as_u32(dest, arg.referring.len())?;
    for list in arg.referring {
        array(dest, list.sessionid.0)?;
        usize_as_u32(dest, list.calls.len())?;
        for call in &list.calls {
            u32(dest, call.sequenceid)?;
            u32(dest, call.slotid)?;
        }
    }
    Ok(())
}
