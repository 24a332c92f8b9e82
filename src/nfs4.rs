//! NFSv4 callback protocol constants and wire-level data types.
//!
//! The callback argument and result types are defined in section 15 of RFC
//! 3530: "Network File System (NFS) version 4 Protocol" and section 20 of
//! RFC 5661: "Network File System (NFS) Version 4 Minor Version 1 Protocol".

use num_derive::{FromPrimitive, ToPrimitive};

/// RPC program number of the NFSv4 callback service.
pub const NFS4_CALLBACK_PROGRAM: u32 = 0x4000_0000;

/// Callback program version.
///
/// RFC 5661 section 18.36.3 requires servers to use 4 in this field, but the
/// official XDR descriptions for both 4.0 and 4.1 specify version 1, and in
/// practice that is what implementations use. An erratum is expected.
pub const NFS4_CALLBACK_VERSION: u32 = 1;

/// Callback procedure numbers.
pub const PROC_CB_NULL: u32 = 0;
pub const PROC_CB_COMPOUND: u32 = 1;

/// Maximum file handle length (`opaque nfs_fh4<NFS4_FHSIZE>`).
pub const NFS4_FHSIZE: usize = 128;
/// Length of a session identifier (`opaque sessionid4[NFS4_SESSIONID_SIZE]`).
pub const NFS4_SESSIONID_SIZE: usize = 16;
/// Length of the non-sequence part of a stateid.
pub const NFS4_STATEID_OTHER_SIZE: usize = 12;
/// Length of a write verifier.
pub const NFS4_VERIFIER_SIZE: usize = 8;
/// Length of a client identifier on the wire.
pub const NFS4_CLIENTID_SIZE: usize = 8;

/// Maximum number of operations allowed in one CB_COMPOUND.
pub const MAX_BACK_CHANNEL_OPS: usize = 32;

pub const NFS4_MAX_UINT64: u64 = u64::MAX;

/// Callback operation numbers this engine issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum CbOpcode {
    GetAttr = 3,
    Recall = 4,
    LayoutRecall = 5,
    RecallAny = 8,
    Sequence = 11,
    NotifyLock = 13,
    Offload = 15,
}

/// NFS status codes that appear in callback replies.
pub mod nfsstat {
    pub const NFS4_OK: u32 = 0;
    pub const NFS4ERR_PERM: u32 = 1;
    pub const NFS4ERR_NOENT: u32 = 2;
    pub const NFS4ERR_IO: u32 = 5;
    pub const NFS4ERR_NXIO: u32 = 6;
    pub const NFS4ERR_ACCESS: u32 = 13;
    pub const NFS4ERR_EXIST: u32 = 17;
    pub const NFS4ERR_XDEV: u32 = 18;
    pub const NFS4ERR_NOTDIR: u32 = 20;
    pub const NFS4ERR_ISDIR: u32 = 21;
    pub const NFS4ERR_INVAL: u32 = 22;
    pub const NFS4ERR_FBIG: u32 = 27;
    pub const NFS4ERR_NOSPC: u32 = 28;
    pub const NFS4ERR_ROFS: u32 = 30;
    pub const NFS4ERR_MLINK: u32 = 31;
    pub const NFS4ERR_NAMETOOLONG: u32 = 63;
    pub const NFS4ERR_NOTEMPTY: u32 = 66;
    pub const NFS4ERR_DQUOT: u32 = 69;
    pub const NFS4ERR_STALE: u32 = 70;
    pub const NFS4ERR_BADHANDLE: u32 = 10001;
    pub const NFS4ERR_BAD_COOKIE: u32 = 10003;
    pub const NFS4ERR_NOTSUPP: u32 = 10004;
    pub const NFS4ERR_TOOSMALL: u32 = 10005;
    pub const NFS4ERR_SERVERFAULT: u32 = 10006;
    pub const NFS4ERR_BADTYPE: u32 = 10007;
    pub const NFS4ERR_DELAY: u32 = 10008;
    pub const NFS4ERR_LOCKED: u32 = 10012;
    pub const NFS4ERR_RESOURCE: u32 = 10018;
    pub const NFS4ERR_SYMLINK: u32 = 10029;
    pub const NFS4ERR_OP_ILLEGAL: u32 = 10044;
    pub const NFS4ERR_DEADLOCK: u32 = 10045;
    pub const NFS4ERR_BADSESSION: u32 = 10052;
    pub const NFS4ERR_BADSLOT: u32 = 10053;
    pub const NFS4ERR_SEQ_MISORDERED: u32 = 10063;
}

/// Attribute bitmap bits requested by CB_GETATTR.
pub const FATTR4_WORD0_CHANGE: u32 = 1 << 3;
pub const FATTR4_WORD0_SIZE: u32 = 1 << 4;
pub const FATTR4_WORD2_TIME_DELEG_ACCESS: u32 = 1 << 20;
pub const FATTR4_WORD2_TIME_DELEG_MODIFY: u32 = 1 << 21;

/// CB_RECALL_ANY type-mask bits (`RCA4_TYPE_MASK_*`).
pub const RCA4_TYPE_MASK_RDATA_DLG: u32 = 1 << 0;
pub const RCA4_TYPE_MASK_WDATA_DLG: u32 = 1 << 1;

/// `layoutiomode4` value recalling layouts of every I/O mode.
pub const IOMODE_ANY: u32 = 3;
/// `layoutrecall_type4` discriminant for a single-file recall.
pub const LAYOUTRECALL4_FILE: u32 = 1;

/// Stability level reported by CB_OFFLOAD for completed copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum StableHow {
    Unstable = 0,
    DataSync = 1,
    FileSync = 2,
}

/// `sessionid4`: 16 opaque bytes naming a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionId(pub [u8; NFS4_SESSIONID_SIZE]);

/// `stateid4`: generation counter plus 12 opaque bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stateid {
    pub seqid: u32,
    pub other: [u8; NFS4_STATEID_OTHER_SIZE],
}

/// `nfs_fh4`: a variable-length file handle of at most [`NFS4_FHSIZE`] bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle(pub Vec<u8>);

/// `verifier4`: 8 opaque bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verifier(pub [u8; NFS4_VERIFIER_SIZE]);

/// `clientid4` as it appears inside a state owner: 8 opaque bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientId(pub [u8; NFS4_CLIENTID_SIZE]);

/// `nfstime4`: seconds since the epoch plus nanoseconds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Time {
    pub seconds: i64,
    pub nseconds: u32,
}
