//! Translation of NFS status codes into the engine's local error taxonomy.
//!
//! Two families of failures meet here: statuses decoded from individual
//! callback operations, and errors reported by the RPC transport. Both are
//! expressed as [`Error`] so a callback's `done` hook sees one taxonomy.

use crate::nfs4::nfsstat::*;

/// Status of a single callback operation: `Ok(())` for NFS4_OK, otherwise the
/// translated error.
pub type OpStatus = Result<(), Error>;

/// Local error taxonomy for callback completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Not owner.
    Permission,
    /// No such file or directory.
    NoEntry,
    /// Hard I/O error, or the transport failed to deliver the call.
    Io,
    /// No such device or address.
    NXio,
    /// Permission denied, either by the client or by the transport.
    Access,
    /// File exists.
    Exist,
    /// Attempted cross-device hard link.
    XDev,
    /// Not a directory.
    NotDir,
    /// Is a directory.
    IsDir,
    /// Invalid or unsupported argument.
    InvalidArgument,
    /// File too large.
    FileTooLarge,
    /// No space left on device.
    NoSpace,
    /// Read-only file system.
    ReadOnlyFs,
    /// Too many hard links.
    TooManyLinks,
    /// Name too long.
    NameTooLong,
    /// Directory not empty.
    NotEmpty,
    /// Quota hard limit exceeded.
    QuotaExceeded,
    /// Stale file handle.
    StaleFile,
    /// File handle failed internal consistency checks.
    BadFileHandle,
    /// Directory cookie is stale.
    BadCookie,
    /// Operation is not supported.
    NotSupp,
    /// Buffer or request is too small.
    TooSmall,
    /// The peer failed in a way that maps to no protocol error, or its reply
    /// contradicted the request.
    ServerFault,
    /// Unsupported object type.
    BadType,
    /// The target is locked; the caller may retry later.
    Locked,
    /// The peer ran out of resources handling the request.
    Resource,
    /// Too many levels of symbolic links.
    Symlink,
    /// The peer considers the operation illegal in this context.
    IllegalOperation,
    /// Granting the request would create a deadlock.
    Deadlock,
    /// The transport gave up waiting for a reply.
    TimedOut,
    /// The RPC client was shut down while the call was in flight.
    Shutdown,
    /// NFS status with no local translation, surfaced raw rather than hidden.
    ///
    /// NFS4ERR_DELAY, NFS4ERR_BADSESSION, NFS4ERR_BADSLOT and
    /// NFS4ERR_SEQ_MISORDERED deliberately ride through this path so the
    /// CB_SEQUENCE state machine can match on the untranslated code.
    Nfs(u32),
}

/// Translates an on-wire NFS status into an [`OpStatus`].
///
/// Codes outside the fixed table are not errors of this function; they come
/// back as [`Error::Nfs`] and the recovery paths decide what to do with them.
pub fn from_nfsstat(code: u32) -> OpStatus {
    match code {
        NFS4_OK => Ok(()),
        NFS4ERR_PERM => Err(Error::Permission),
        NFS4ERR_NOENT => Err(Error::NoEntry),
        NFS4ERR_IO => Err(Error::Io),
        NFS4ERR_NXIO => Err(Error::NXio),
        NFS4ERR_ACCESS => Err(Error::Access),
        NFS4ERR_EXIST => Err(Error::Exist),
        NFS4ERR_XDEV => Err(Error::XDev),
        NFS4ERR_NOTDIR => Err(Error::NotDir),
        NFS4ERR_ISDIR => Err(Error::IsDir),
        NFS4ERR_INVAL => Err(Error::InvalidArgument),
        NFS4ERR_FBIG => Err(Error::FileTooLarge),
        NFS4ERR_NOSPC => Err(Error::NoSpace),
        NFS4ERR_ROFS => Err(Error::ReadOnlyFs),
        NFS4ERR_MLINK => Err(Error::TooManyLinks),
        NFS4ERR_NAMETOOLONG => Err(Error::NameTooLong),
        NFS4ERR_NOTEMPTY => Err(Error::NotEmpty),
        NFS4ERR_DQUOT => Err(Error::QuotaExceeded),
        NFS4ERR_STALE => Err(Error::StaleFile),
        NFS4ERR_BADHANDLE => Err(Error::BadFileHandle),
        NFS4ERR_BAD_COOKIE => Err(Error::BadCookie),
        NFS4ERR_NOTSUPP => Err(Error::NotSupp),
        NFS4ERR_TOOSMALL => Err(Error::TooSmall),
        NFS4ERR_SERVERFAULT => Err(Error::ServerFault),
        NFS4ERR_BADTYPE => Err(Error::BadType),
        NFS4ERR_LOCKED => Err(Error::Locked),
        NFS4ERR_RESOURCE => Err(Error::Resource),
        NFS4ERR_SYMLINK => Err(Error::Symlink),
        NFS4ERR_OP_ILLEGAL => Err(Error::IllegalOperation),
        NFS4ERR_DEADLOCK => Err(Error::Deadlock),
        other => Err(Error::Nfs(other)),
    }
}

/// Outcome of the CB_SEQUENCE phase of one RPC attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqStatus {
    /// No CB_SEQUENCE result was ever decoded; the transport did not deliver
    /// a usable reply. The client may or may not have processed the call.
    NoReply,
    /// CB_SEQUENCE returned NFS4_OK and its echoed fields matched the request.
    Ok,
    /// CB_SEQUENCE failed, or its echoed fields contradicted the request
    /// (the latter reported as [`Error::ServerFault`]).
    Error(Error),
}
