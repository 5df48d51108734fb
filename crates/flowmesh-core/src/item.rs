//! Item Serialization
//!
//! Typed items are written to and read from block streams through the
//! [`Item`] trait. The trait is deliberately cursor-based: an encoder only
//! sees an [`ItemWriter`] capability (append bytes) and a decoder only sees
//! an [`ItemReader`] capability (consume bytes), so the same impls serve
//! files, block queues, and network channels, and items may freely span
//! block boundaries.
//!
//! ## Wire Conventions
//!
//! - Fixed-width integers and floats are little-endian.
//! - `bool` is one byte, `0` or `1`.
//! - Variable-size payloads (`String`, `Vec<T>`) are prefixed with their
//!   element count as an LEB128 varint: seven payload bits per byte, high
//!   bit as continuation flag. Small lengths cost a single byte.
//! - `Option<T>` is a one-byte tag followed by the value if present.
//! - Tuples are their fields in order with no framing.
//!
//! Types whose encoding has a constant byte size advertise it via
//! [`Item::FIXED_SIZE`], which enables arithmetic seeks instead of
//! decode-and-discard.

use crate::error::{Error, Result};

/// Append-side cursor capability. Implemented by block writers and by
/// `Vec<u8>` for in-memory encoding.
pub trait ItemWriter {
    /// Append raw bytes, splitting across blocks as needed.
    fn put_slice(&mut self, data: &[u8]) -> Result<()>;

    fn put_u8(&mut self, byte: u8) -> Result<()> {
        self.put_slice(&[byte])
    }

    /// Append an LEB128-encoded unsigned integer.
    fn put_varint(&mut self, mut value: u64) -> Result<()> {
        while value >= 0x80 {
            self.put_u8((value as u8) | 0x80)?;
            value >>= 7;
        }
        self.put_u8(value as u8)
    }
}

/// Consume-side cursor capability. Implemented by block readers and by
/// [`SliceReader`] for in-memory decoding.
pub trait ItemReader {
    /// Fill `out` with the next bytes of the stream.
    fn read_slice(&mut self, out: &mut [u8]) -> Result<()>;

    fn read_u8(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_slice(&mut byte)?;
        Ok(byte[0])
    }

    /// Read an LEB128-encoded unsigned integer.
    fn read_varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift == 63 && byte > 1 {
                return Err(Error::InvalidArgument(
                    "varint overflows u64".to_string(),
                ));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }
}

impl ItemWriter for Vec<u8> {
    fn put_slice(&mut self, data: &[u8]) -> Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }
}

/// [`ItemReader`] over an in-memory byte slice.
pub struct SliceReader<'a> {
    data: &'a [u8],
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn remaining(&self) -> usize {
        self.data.len()
    }
}

impl ItemReader for SliceReader<'_> {
    fn read_slice(&mut self, out: &mut [u8]) -> Result<()> {
        if self.data.len() < out.len() {
            return Err(Error::UnexpectedEndOfStream);
        }
        let (head, tail) = self.data.split_at(out.len());
        out.copy_from_slice(head);
        self.data = tail;
        Ok(())
    }
}

/// A type that can be stored in block streams.
pub trait Item: Sized {
    /// `Some(n)` when every value of the type encodes to exactly `n` bytes.
    const FIXED_SIZE: Option<usize>;

    fn encode<W: ItemWriter + ?Sized>(&self, writer: &mut W) -> Result<()>;

    fn decode<R: ItemReader + ?Sized>(reader: &mut R) -> Result<Self>;
}

/// Stable fingerprint of a type identity, used by self-verifying streams to
/// catch writer/reader type confusion. Stable within one build of the
/// engine, which is the only place it is ever compared.
pub fn type_fingerprint<T>() -> u32 {
    crc32fast::hash(std::any::type_name::<T>().as_bytes())
}

macro_rules! impl_item_for_primitive {
    ($($ty:ty),*) => {
        $(
            impl Item for $ty {
                const FIXED_SIZE: Option<usize> = Some(std::mem::size_of::<$ty>());

                fn encode<W: ItemWriter + ?Sized>(&self, writer: &mut W) -> Result<()> {
                    writer.put_slice(&self.to_le_bytes())
                }

                fn decode<R: ItemReader + ?Sized>(reader: &mut R) -> Result<Self> {
                    let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                    reader.read_slice(&mut bytes)?;
                    Ok(<$ty>::from_le_bytes(bytes))
                }
            }
        )*
    };
}

impl_item_for_primitive!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

impl Item for bool {
    const FIXED_SIZE: Option<usize> = Some(1);

    fn encode<W: ItemWriter + ?Sized>(&self, writer: &mut W) -> Result<()> {
        writer.put_u8(u8::from(*self))
    }

    fn decode<R: ItemReader + ?Sized>(reader: &mut R) -> Result<Self> {
        Ok(reader.read_u8()? != 0)
    }
}

impl Item for () {
    const FIXED_SIZE: Option<usize> = Some(0);

    fn encode<W: ItemWriter + ?Sized>(&self, _writer: &mut W) -> Result<()> {
        Ok(())
    }

    fn decode<R: ItemReader + ?Sized>(_reader: &mut R) -> Result<Self> {
        Ok(())
    }
}

impl Item for String {
    const FIXED_SIZE: Option<usize> = None;

    fn encode<W: ItemWriter + ?Sized>(&self, writer: &mut W) -> Result<()> {
        writer.put_varint(self.len() as u64)?;
        writer.put_slice(self.as_bytes())
    }

    fn decode<R: ItemReader + ?Sized>(reader: &mut R) -> Result<Self> {
        let len = reader.read_varint()? as usize;
        let mut bytes = vec![0u8; len];
        reader.read_slice(&mut bytes)?;
        String::from_utf8(bytes)
            .map_err(|e| Error::InvalidArgument(format!("non-utf8 string item: {e}")))
    }
}

impl<T: Item> Item for Vec<T> {
    const FIXED_SIZE: Option<usize> = None;

    fn encode<W: ItemWriter + ?Sized>(&self, writer: &mut W) -> Result<()> {
        writer.put_varint(self.len() as u64)?;
        for element in self {
            element.encode(writer)?;
        }
        Ok(())
    }

    fn decode<R: ItemReader + ?Sized>(reader: &mut R) -> Result<Self> {
        let len = reader.read_varint()? as usize;
        let mut out = Vec::with_capacity(len.min(4096));
        for _ in 0..len {
            out.push(T::decode(reader)?);
        }
        Ok(out)
    }
}

impl<T: Item> Item for Option<T> {
    const FIXED_SIZE: Option<usize> = None;

    fn encode<W: ItemWriter + ?Sized>(&self, writer: &mut W) -> Result<()> {
        match self {
            None => writer.put_u8(0),
            Some(value) => {
                writer.put_u8(1)?;
                value.encode(writer)
            }
        }
    }

    fn decode<R: ItemReader + ?Sized>(reader: &mut R) -> Result<Self> {
        match reader.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(reader)?)),
            tag => Err(Error::InvalidArgument(format!(
                "bad option tag {tag} in item stream"
            ))),
        }
    }
}

/// Combine fixed sizes of consecutive fields; any variable field makes the
/// whole encoding variable.
const fn sum_fixed(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + b),
        _ => None,
    }
}

impl<A: Item, B: Item> Item for (A, B) {
    const FIXED_SIZE: Option<usize> = sum_fixed(A::FIXED_SIZE, B::FIXED_SIZE);

    fn encode<W: ItemWriter + ?Sized>(&self, writer: &mut W) -> Result<()> {
        self.0.encode(writer)?;
        self.1.encode(writer)
    }

    fn decode<R: ItemReader + ?Sized>(reader: &mut R) -> Result<Self> {
        let a = A::decode(reader)?;
        let b = B::decode(reader)?;
        Ok((a, b))
    }
}

impl<A: Item, B: Item, C: Item> Item for (A, B, C) {
    const FIXED_SIZE: Option<usize> =
        sum_fixed(sum_fixed(A::FIXED_SIZE, B::FIXED_SIZE), C::FIXED_SIZE);

    fn encode<W: ItemWriter + ?Sized>(&self, writer: &mut W) -> Result<()> {
        self.0.encode(writer)?;
        self.1.encode(writer)?;
        self.2.encode(writer)
    }

    fn decode<R: ItemReader + ?Sized>(reader: &mut R) -> Result<Self> {
        let a = A::decode(reader)?;
        let b = B::decode(reader)?;
        let c = C::decode(reader)?;
        Ok((a, b, c))
    }
}

impl<A: Item, B: Item, C: Item, D: Item> Item for (A, B, C, D) {
    const FIXED_SIZE: Option<usize> = sum_fixed(
        sum_fixed(sum_fixed(A::FIXED_SIZE, B::FIXED_SIZE), C::FIXED_SIZE),
        D::FIXED_SIZE,
    );

    fn encode<W: ItemWriter + ?Sized>(&self, writer: &mut W) -> Result<()> {
        self.0.encode(writer)?;
        self.1.encode(writer)?;
        self.2.encode(writer)?;
        self.3.encode(writer)
    }

    fn decode<R: ItemReader + ?Sized>(reader: &mut R) -> Result<Self> {
        let a = A::decode(reader)?;
        let b = B::decode(reader)?;
        let c = C::decode(reader)?;
        let d = D::decode(reader)?;
        Ok((a, b, c, d))
    }
}
