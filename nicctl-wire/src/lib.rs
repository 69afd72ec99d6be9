//! Wire formats exchanged with NIC firmware over the control queue.
//!
//! Everything is little endian. Fixed-size records implement [`Payload`], which is used
//! to build and parse the indirect buffers attached to descriptors.
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

pub mod desc;
pub mod opcode;
pub mod rl;
pub mod sched;
pub mod status;
pub mod txq;

pub use desc::{Descriptor, Params, DESC_LEN};
pub use opcode::Opcode;
pub use status::ReturnCode;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Buffer too short: need {need} bytes, have {have}")]
    Short { need: usize, have: usize },
    #[error("Unknown element type {0:#x}")]
    ElemType(u8),
    #[error("Unknown opcode {0:#06x}")]
    Opcode(u16),
    #[error("Too many entries: {count} exceeds {max}")]
    Count { count: usize, max: usize },
}

/// A fixed-size record that can be written to and read from a firmware buffer.
pub trait Payload: Sized {
    /// The encoded length in bytes.
    const LEN: usize;

    fn encode<B: BufMut>(&self, dst: &mut B);

    /// Decodes one record. Implementations may assume `src.remaining() >= Self::LEN`,
    /// use [`decode_checked`] from callers.
    fn decode<B: Buf>(src: &mut B) -> Result<Self, Error>;
}

/// Decodes a single record after checking the remaining length.
pub fn decode_checked<T: Payload, B: Buf>(src: &mut B) -> Result<T, Error> {
    ensure_len(src.remaining(), T::LEN)?;
    T::decode(src)
}

/// Decodes `count` consecutive records.
pub fn decode_list<T: Payload, B: Buf>(src: &mut B, count: usize) -> Result<Vec<T>, Error> {
    ensure_len(src.remaining(), T::LEN * count)?;
    (0..count).map(|_| T::decode(src)).collect()
}

/// Encodes the records back to back into a fresh buffer.
pub fn encode_list<'a, T: Payload + 'a>(items: impl IntoIterator<Item = &'a T>) -> BytesMut {
    let mut buf = BytesMut::new();
    for item in items {
        buf.reserve(T::LEN);
        item.encode(&mut buf);
    }
    buf
}

#[inline]
pub(crate) fn ensure_len(have: usize, need: usize) -> Result<(), Error> {
    if have < need {
        return Err(Error::Short { need, have });
    }
    Ok(())
}
