#![no_main]

use std::io::Cursor;

use libfuzzer_sys::fuzz_target;
use nfs_backchannel::nfs4::CbOpcode;
use nfs_backchannel::parser::{compound, get_attr, sequence};

// The reply decoders must reject arbitrary bytes without panicking or
// over-reading.
fuzz_target!(|data: &[u8]| {
    let mut src = Cursor::new(data);
    if compound::header(&mut src).is_err() {
        return;
    }
    match compound::op_status(&mut src, CbOpcode::Sequence) {
        Ok(Ok(())) => {
            if sequence::res_ok(&mut src).is_err() {
                return;
            }
        }
        Ok(Err(_)) => return,
        Err(_) => return,
    }
    match compound::op_status(&mut src, CbOpcode::GetAttr) {
        Ok(Ok(())) => {
            let _ = get_attr::res_ok(&mut src);
        }
        Ok(Err(_)) | Err(_) => {}
    }
});
