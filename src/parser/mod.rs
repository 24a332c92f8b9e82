//! XDR decoding of NFSv4 callback replies.

pub mod compound;
pub mod get_attr;
pub mod primitive;
pub mod sequence;


/// Errors raised while decoding a callback reply.
#[derive(Debug)]
pub enum Error {
    /// Short read or other I/O failure against the reply buffer.
    IO(std::io::Error),
    /// Non-zero length where XDR padding was expected.
    IncorrectPadding,
    /// A discriminant did not match any known enum variant.
    EnumDiscMismatch,
    /// A length-prefixed field exceeded its protocol maximum.
    MaxElemLimit,
    /// A length did not fit the native word size.
    ImpossibleTypeCast,
    /// The reply carried a different operation number than the request.
    OpcodeMismatch { expected: u32, found: u32 },
}

/// Result of decoding operations with error type [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
