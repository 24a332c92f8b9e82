//! Primitive XDR data type parsing utilities.

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt};
use num_traits::{FromPrimitive, ToPrimitive};

use super::{Error, Result};

/// The XDR alignment in bytes.
pub const ALIGNMENT: usize = 4;

/// Reads and discards padding bytes to ensure XDR alignment.
pub fn padding(src: &mut impl Read, n: usize) -> Result<()> {
    let mut buf = [0u8; ALIGNMENT];
    let padding = (ALIGNMENT - n % ALIGNMENT) % ALIGNMENT;
    src.read_exact(&mut buf[..padding]).map_err(|_| Error::IncorrectPadding)
}

/// Parses a `u32` (unsigned 32-bit integer) from the `Read` source, in Big-Endian format.
pub fn u32(src: &mut impl Read) -> Result<u32> {
    src.read_u32::<BigEndian>().map_err(Error::IO)
}

/// Parses a `u64` (unsigned 64-bit integer) from the `Read` source, in Big-Endian format.
pub fn u64(src: &mut impl Read) -> Result<u64> {
    src.read_u64::<BigEndian>().map_err(Error::IO)
}

/// Parses an `i64` (signed 64-bit integer) from the `Read` source, in Big-Endian format.
pub fn i64(src: &mut impl Read) -> Result<i64> {
    src.read_i64::<BigEndian>().map_err(Error::IO)
}

/// Parses an XDR boolean (encoded as a `u32`) from the `Read` source.
pub fn bool(src: &mut impl Read) -> Result<bool> {
    match u32(src)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(Error::EnumDiscMismatch),
    }
}

/// Parses a fixed-size array of bytes `[u8; N]` from the `Read` source, including padding.
pub fn array<const N: usize>(src: &mut impl Read) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    src.read_exact(&mut buf).map_err(Error::IO)?;
    padding(src, N)?;
    Ok(buf)
}

/// Parses a variable-length vector of bytes with a maximum allowed size.
pub fn vec_max_size(src: &mut impl Read, max_size: usize) -> Result<Vec<u8>> {
    let size = u32_as_usize(src)?;
    if size > max_size {
        return Err(Error::MaxElemLimit);
    }
    let mut vec = vec![0u8; size];
    src.read_exact(vec.as_mut_slice()).map_err(Error::IO)?;
    padding(src, size)?;
    Ok(vec)
}

/// Parses an XDR `bitmap4` into a fixed set of words.
///
/// The on-wire count may be smaller than `N` (missing words read as zero) but
/// never larger.
pub fn bitmap<const N: usize>(src: &mut impl Read) -> Result<[u32; N]> {
    let count = u32_as_usize(src)?;
    if count > N {
        return Err(Error::MaxElemLimit);
    }
    let mut words = [0u32; N];
    for word in words.iter_mut().take(count) {
        *word = u32(src)?;
    }
    Ok(words)
}

/// Parses an XDR enum variant from the `Read` source.
pub fn variant<T: FromPrimitive>(src: &mut impl Read) -> Result<T> {
    FromPrimitive::from_u32(u32(src)?).ok_or(Error::EnumDiscMismatch)
}

/// Parses a `u32` from the `Read` source and converts it to `usize`.
pub fn u32_as_usize(src: &mut impl Read) -> Result<usize> {
    u32(src)?.to_usize().ok_or(Error::ImpossibleTypeCast)
}
