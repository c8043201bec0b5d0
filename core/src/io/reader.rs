use bytemuck::Pod;

use super::writer::Primitive;
use super::{ByteOrder, MAX_ARRAY_LENGTH, MAX_STRING_LENGTH, Stream, StreamError, align_up};

/// Typed reader over a [`Stream`], the mirror of [`Writer`](super::Writer).
pub struct Reader<S: Stream> {
    stream: S,
    order: ByteOrder,
    alignment: Vec<u64>,
}

impl<S: Stream> Reader<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            order: ByteOrder::Little,
            alignment: Vec::new(),
        }
    }

    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    pub fn position(&self) -> u64 {
        self.stream.position()
    }

    pub fn seek(&mut self, position: u64) -> Result<(), StreamError> {
        self.stream.seek(position)
    }

    pub fn remaining(&self) -> u64 {
        self.stream.remaining()
    }

    pub fn push_alignment(&mut self, alignment: u64) -> Result<(), StreamError> {
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(StreamError::InvalidAlignment(alignment));
        }
        self.alignment.push(alignment);
        Ok(())
    }

    pub fn pop_alignment(&mut self) {
        self.alignment.pop();
    }

    /// Skips padding up to the next multiple of `alignment`.
    pub fn align_to(&mut self, alignment: u64) -> Result<(), StreamError> {
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(StreamError::InvalidAlignment(alignment));
        }
        let pos = self.stream.position();
        let target = align_up(pos, alignment);
        if target > self.stream.size() {
            return Err(StreamError::UnexpectedEof {
                position: pos,
                requested: (target - pos) as usize,
            });
        }
        self.stream.seek(target)
    }

    fn align_for<T>(&mut self) -> Result<(), StreamError> {
        if let Some(&scope) = self.alignment.last() {
            let natural = std::mem::align_of::<T>() as u64;
            self.align_to(natural.min(scope))?;
        }
        Ok(())
    }

    pub fn read<T: Primitive>(&mut self) -> Result<T, StreamError> {
        self.align_for::<T>()?;
        let mut value = T::zeroed();
        self.stream.read(bytemuck::bytes_of_mut(&mut value))?;
        Ok(if self.order.needs_swap() { value.swap_bytes() } else { value })
    }

    pub fn read_bool(&mut self) -> Result<bool, StreamError> {
        Ok(self.read::<u8>()? != 0)
    }

    pub fn read_pod<T: Pod>(&mut self) -> Result<T, StreamError> {
        self.align_for::<T>()?;
        let mut value = T::zeroed();
        self.stream.read(bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, StreamError> {
        if len as u64 > self.stream.remaining() {
            return Err(StreamError::UnexpectedEof {
                position: self.stream.position(),
                requested: len,
            });
        }
        let mut out = vec![0u8; len];
        self.stream.read(&mut out)?;
        Ok(out)
    }

    pub fn read_string(&mut self) -> Result<String, StreamError> {
        let len = self.read::<u32>()? as usize;
        if len > MAX_STRING_LENGTH {
            return Err(StreamError::LengthTooLarge {
                length: len,
                max: MAX_STRING_LENGTH,
            });
        }
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| StreamError::InvalidUtf8)
    }

    pub fn read_array<T: Primitive>(&mut self) -> Result<Vec<T>, StreamError> {
        let len = self.read::<u32>()? as usize;
        if len > MAX_ARRAY_LENGTH {
            return Err(StreamError::LengthTooLarge {
                length: len,
                max: MAX_ARRAY_LENGTH,
            });
        }
        (0..len).map(|_| self.read::<T>()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemoryStream, Writer};

    fn reader_of(writer: Writer<MemoryStream>) -> Reader<MemoryStream> {
        let mut stream = writer.into_inner();
        stream.seek(0).unwrap();
        Reader::new(stream)
    }

    #[test]
    fn test_primitives_round_trip() {
        let mut w = Writer::new(MemoryStream::new());
        w.write(0xABu8).unwrap();
        w.write(0xBEEFu16).unwrap();
        w.write(-7i32).unwrap();
        w.write(1.5f32).unwrap();
        w.write(u64::MAX - 1).unwrap();
        w.write_bool(true).unwrap();

        let mut r = reader_of(w);
        assert_eq!(r.read::<u8>().unwrap(), 0xAB);
        assert_eq!(r.read::<u16>().unwrap(), 0xBEEF);
        assert_eq!(r.read::<i32>().unwrap(), -7);
        assert_eq!(r.read::<f32>().unwrap(), 1.5);
        assert_eq!(r.read::<u64>().unwrap(), u64::MAX - 1);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut w = Writer::new(MemoryStream::new());
        w.write(0x0102_0304u32).unwrap();
        assert_eq!(w.stream().data(), &[4, 3, 2, 1]);

        let mut w = Writer::new(MemoryStream::new()).with_byte_order(ByteOrder::Big);
        w.write(0x0102_0304u32).unwrap();
        assert_eq!(w.stream().data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_aligned_scope_round_trip() {
        let mut w = Writer::new(MemoryStream::new());
        w.push_alignment(8).unwrap();
        w.write(1u8).unwrap();
        w.write(2u64).unwrap();
        w.write(3u16).unwrap();
        w.pop_alignment();
        assert_eq!(w.position(), 18);

        let mut r = reader_of(w);
        r.push_alignment(8).unwrap();
        assert_eq!(r.read::<u8>().unwrap(), 1);
        assert_eq!(r.read::<u64>().unwrap(), 2);
        assert_eq!(r.read::<u16>().unwrap(), 3);
    }

    #[test]
    fn test_strings_and_arrays() {
        let mut w = Writer::new(MemoryStream::new());
        w.write_string("oxygen").unwrap();
        w.write_array(&[1u32, 2, 3]).unwrap();
        w.write_string("").unwrap();

        let mut r = reader_of(w);
        assert_eq!(r.read_string().unwrap(), "oxygen");
        assert_eq!(r.read_array::<u32>().unwrap(), vec![1, 2, 3]);
        assert_eq!(r.read_string().unwrap(), "");
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        let mut w = Writer::new(MemoryStream::new());
        w.write((MAX_STRING_LENGTH + 1) as u32).unwrap();
        let mut r = reader_of(w);
        assert!(matches!(r.read_string(), Err(StreamError::LengthTooLarge { .. })));
    }

    #[test]
    fn test_pod_round_trip() {
        #[repr(C)]
        #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
        struct Pair {
            a: u32,
            b: f32,
        }

        let mut w = Writer::new(MemoryStream::new());
        w.write(9u8).unwrap();
        w.push_alignment(4).unwrap();
        w.write_pod(&Pair { a: 5, b: 2.0 }).unwrap();

        let mut r = reader_of(w);
        assert_eq!(r.read::<u8>().unwrap(), 9);
        r.push_alignment(4).unwrap();
        assert_eq!(r.read_pod::<Pair>().unwrap(), Pair { a: 5, b: 2.0 });
    }
}
