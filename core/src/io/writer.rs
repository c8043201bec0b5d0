use bytemuck::Pod;

use super::{ByteOrder, MAX_ARRAY_LENGTH, MAX_STRING_LENGTH, Stream, StreamError, align_up};

/// Primitive value with a defined byte order.
pub trait Primitive: Pod {
    fn swap_bytes(self) -> Self;
}

macro_rules! impl_primitive_int {
    ($($t:ty),*) => {
        $(impl Primitive for $t {
            #[inline]
            fn swap_bytes(self) -> Self {
                <$t>::swap_bytes(self)
            }
        })*
    };
}

impl_primitive_int!(u8, u16, u32, u64, i8, i16, i32, i64);

impl Primitive for f32 {
    #[inline]
    fn swap_bytes(self) -> Self {
        f32::from_bits(self.to_bits().swap_bytes())
    }
}

impl Primitive for f64 {
    #[inline]
    fn swap_bytes(self) -> Self {
        f64::from_bits(self.to_bits().swap_bytes())
    }
}

/// Typed writer over a [`Stream`].
///
/// Values are packed by default. Inside an alignment scope
/// ([`push_alignment`](Self::push_alignment)) each value is padded to
/// `min(align_of::<T>(), scope_alignment)`; a [`Reader`](super::Reader) with
/// the same scopes reads it back.
pub struct Writer<S: Stream> {
    stream: S,
    order: ByteOrder,
    alignment: Vec<u64>,
}

impl<S: Stream> Writer<S> {
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

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    pub fn position(&self) -> u64 {
        self.stream.position()
    }

    /// Enters an alignment scope.
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

    /// Pads with zeros up to the next multiple of `alignment`.
    pub fn align_to(&mut self, alignment: u64) -> Result<(), StreamError> {
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(StreamError::InvalidAlignment(alignment));
        }
        let pos = self.stream.position();
        let padding = align_up(pos, alignment) - pos;
        if padding > 0 {
            self.stream.write(&vec![0u8; padding as usize])?;
        }
        Ok(())
    }

    fn align_for<T>(&mut self) -> Result<(), StreamError> {
        if let Some(&scope) = self.alignment.last() {
            let natural = std::mem::align_of::<T>() as u64;
            self.align_to(natural.min(scope))?;
        }
        Ok(())
    }

    /// Writes a primitive in the configured byte order.
    pub fn write<T: Primitive>(&mut self, value: T) -> Result<(), StreamError> {
        self.align_for::<T>()?;
        let value = if self.order.needs_swap() { value.swap_bytes() } else { value };
        self.stream.write(bytemuck::bytes_of(&value))
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), StreamError> {
        self.write(u8::from(value))
    }

    /// Writes a plain-old-data value verbatim (host layout).
    pub fn write_pod<T: Pod>(&mut self, value: &T) -> Result<(), StreamError> {
        self.align_for::<T>()?;
        self.stream.write(bytemuck::bytes_of(value))
    }

    /// Writes raw bytes without a length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.stream.write(bytes)
    }

    /// Writes a `u32` length followed by UTF-8 bytes.
    pub fn write_string(&mut self, value: &str) -> Result<(), StreamError> {
        if value.len() > MAX_STRING_LENGTH {
            return Err(StreamError::LengthTooLarge {
                length: value.len(),
                max: MAX_STRING_LENGTH,
            });
        }
        self.write(value.len() as u32)?;
        self.stream.write(value.as_bytes())
    }

    /// Writes a `u32` count followed by the primitives.
    pub fn write_array<T: Primitive>(&mut self, values: &[T]) -> Result<(), StreamError> {
        if values.len() > MAX_ARRAY_LENGTH {
            return Err(StreamError::LengthTooLarge {
                length: values.len(),
                max: MAX_ARRAY_LENGTH,
            });
        }
        self.write(values.len() as u32)?;
        for v in values {
            self.write(*v)?;
        }
        Ok(())
    }
}
