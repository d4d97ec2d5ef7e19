use arrayvec::ArrayVec;

/// Longest text frame we accept, including whitespace.
pub const TEXT_BUFFER_SIZE: usize = 128;

/// Bounded accumulator for one text frame.
#[derive(Debug, Default)]
pub struct Buffer {
    data: ArrayVec<u8, TEXT_BUFFER_SIZE>,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer {
            data: ArrayVec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.data.is_full()
    }

    /// Append a byte, returns false if the buffer is full.
    pub fn push(&mut self, byte: u8) -> bool {
        // map all non-ASCII bytes to NUL
        let byte = if byte > 0x7f { 0 } else { byte };
        self.data.try_push(byte).is_ok()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        self.data.as_ref()
    }
}
