//! Implements parsing for the CB_COMPOUND reply envelope.
//!
//! ```text
//! struct CB_COMPOUND4res {
//!     nfsstat4        status;
//!     utf8str_cs      tag;
//!     nfs_cb_resop4   resarray<>;
//! };
//! ```

use std::io::Read;

use num_traits::ToPrimitive;

use crate::nfs4::CbOpcode;
use crate::parser::primitive::{u32, vec_max_size};
use crate::parser::{Error, Result};
use crate::status::{self, OpStatus};

/// Upper bound on the reply tag this engine is willing to skip over.
const MAX_REPLY_TAG: usize = 1024;

/// Decoded CB_COMPOUND reply header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    /// Overall compound status, as sent. Individual operation statuses are
    /// what the engine acts on.
    pub status: u32,
    /// Number of operation results that follow.
    pub nops: u32,
}

/// Parses the CB_COMPOUND reply header. The tag is skipped.
pub fn header(src: &mut impl Read) -> Result<ReplyHeader> {
    let status = u32(src)?;
    vec_max_size(src, MAX_REPLY_TAG)?;
    let nops = u32(src)?;
    Ok(ReplyHeader { status, nops })
}

/// Parses one operation result header: the echoed operation number followed
/// by its status, translated into the local taxonomy.
///
/// A reply carrying an operation number other than `expected` fails the
/// decode; the two sides have lost framing agreement.
pub fn op_status(src: &mut impl Read, expected: CbOpcode) -> Result<OpStatus> {
    let expected = expected.to_u32().unwrap_or_default();
    let found = u32(src)?;
    if found != expected {
        return Err(Error::OpcodeMismatch { expected, found });
    }
    Ok(status::from_nfsstat(u32(src)?))
}
