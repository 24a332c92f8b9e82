//! XDR serializer for CB_RECALL_ANY arguments (RFC 5661, 20.6).
//!
//! ```text
//! struct CB_RECALLANY4args {
//!     uint32_t    craa_objects_to_keep;
//!     bitmap4     craa_type_mask;
//! };
//! ```

use std::io;
use std::io::Write;

use crate::callback::RecallAnyArgs;
use crate::nfs4::CbOpcode;
use crate::serializer::cb::bitmap;
use crate::serializer::{u32, variant};

pub fn args(dest: &mut impl Write, arg: &RecallAnyArgs) -> io::Result<()> {
    variant(dest, CbOpcode::RecallAny)?;
    u32(dest, arg.objects_to_keep)?;
    bitmap(dest, &arg.type_mask)
}
