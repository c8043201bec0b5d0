use super::StreamError;

/// Seekable byte stream.
///
/// Reads are exact: a short read is an error, never a partial success.
pub trait Stream {
    /// Fills `buf` completely from the current position.
    fn read(&mut self, buf: &mut [u8]) -> Result<(), StreamError>;

    /// Writes all of `data` at the current position.
    fn write(&mut self, data: &[u8]) -> Result<(), StreamError>;

    /// Current position in bytes.
    fn position(&self) -> u64;

    /// Moves to an absolute position in `[0, size]`.
    fn seek(&mut self, position: u64) -> Result<(), StreamError>;

    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Moves relative to the current position.
    fn seek_relative(&mut self, offset: i64) -> Result<(), StreamError> {
        let target = self.position() as i64 + offset;
        if target < 0 || target as u64 > self.size() {
            return Err(StreamError::InvalidSeek { target, size: self.size() });
        }
        self.seek(target as u64)
    }

    /// Bytes left between the position and the end.
    fn remaining(&self) -> u64 {
        self.size().saturating_sub(self.position())
    }
}

/// Runtime-polymorphic stream.
pub type AnyStream = Box<dyn Stream + Send>;

impl<S: Stream + ?Sized> Stream for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<(), StreamError> {
        (**self).read(buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), StreamError> {
        (**self).write(data)
    }

    fn position(&self) -> u64 {
        (**self).position()
    }

    fn seek(&mut self, position: u64) -> Result<(), StreamError> {
        (**self).seek(position)
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}

/// In-memory stream over an owned buffer.
///
/// Writes past the end grow the buffer unless the stream was created with a
/// fixed capacity.
#[derive(Debug, Default, Clone)]
pub struct MemoryStream {
    data: Vec<u8>,
    position: u64,
    fixed_capacity: Option<u64>,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps existing bytes, positioned at the start.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            position: 0,
            fixed_capacity: None,
        }
    }

    /// Stream that refuses to grow beyond `capacity` bytes.
    pub fn with_fixed_capacity(capacity: u64) -> Self {
        Self {
            data: Vec::with_capacity(capacity as usize),
            position: 0,
            fixed_capacity: Some(capacity),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Empties the stream and rewinds.
    pub fn reset(&mut self) {
        self.data.clear();
        self.position = 0;
    }
}

impl Stream for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<(), StreamError> {
        let start = self.position as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(StreamError::UnexpectedEof {
                position: self.position,
                requested: buf.len(),
            });
        }
        buf.copy_from_slice(&self.data[start..end]);
        self.position = end as u64;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), StreamError> {
        let start = self.position as usize;
        let end = start + data.len();
        if let Some(capacity) = self.fixed_capacity
            && end as u64 > capacity
        {
            return Err(StreamError::CapacityExceeded {
                requested: end as u64,
                capacity,
            });
        }
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(data);
        self.position = end as u64;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, position: u64) -> Result<(), StreamError> {
        if position > self.data.len() as u64 {
            return Err(StreamError::InvalidSeek {
                target: position as i64,
                size: self.data.len() as u64,
            });
        }
        self.position = position;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_back() {
        let mut stream = MemoryStream::new();
        stream.write(&[1, 2, 3, 4]).unwrap();
        assert_eq!(stream.position(), 4);
        assert_eq!(stream.size(), 4);

        stream.seek(1).unwrap();
        let mut buf = [0u8; 2];
        stream.read(&mut buf).unwrap();
        assert_eq!(buf, [2, 3]);
        assert_eq!(stream.remaining(), 1);
    }

    #[test]
    fn test_overwrite_in_place_keeps_size() {
        let mut stream = MemoryStream::from_bytes(vec![0; 8]);
        stream.seek(2).unwrap();
        stream.write(&[9, 9]).unwrap();
        assert_eq!(stream.size(), 8);
        assert_eq!(&stream.data()[..4], &[0, 0, 9, 9]);
    }

    #[test]
    fn test_read_past_end_fails_without_moving() {
        let mut stream = MemoryStream::from_bytes(vec![1, 2]);
        let mut buf = [0u8; 3];
        assert!(matches!(stream.read(&mut buf), Err(StreamError::UnexpectedEof { .. })));
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn test_seek_bounds() {
        let mut stream = MemoryStream::from_bytes(vec![0; 4]);
        assert!(stream.seek(4).is_ok());
        assert!(stream.seek(5).is_err());
        assert!(stream.seek_relative(-5).is_err());
        assert!(stream.seek_relative(-4).is_ok());
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn test_fixed_capacity() {
        let mut stream = MemoryStream::with_fixed_capacity(4);
        assert!(stream.write(&[0; 4]).is_ok());
        let err = stream.write(&[0]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::OutOfCapacity);
    }

    #[test]
    fn test_any_stream_dispatch() {
        let mut any: AnyStream = Box::new(MemoryStream::new());
        any.write(&[5, 6]).unwrap();
        any.seek(0).unwrap();
        let mut buf = [0u8; 2];
        any.read(&mut buf).unwrap();
        assert_eq!(buf, [5, 6]);
    }
}
