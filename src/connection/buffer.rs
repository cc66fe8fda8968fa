/// Fixed-capacity FIFO byte buffer.
///
/// Bytes are appended at the back and drained from the front. Draining
/// compacts the remaining bytes to the start of the storage, so the free
/// space is always one contiguous tail that can be handed to a `read()`.
#[derive(Debug, Default)]
pub(crate) struct IoBuffer {
    storage: Box<[u8]>,
    len: usize,
}

impl IoBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    pub fn filled(&self) -> &[u8] {
        &self.storage[..self.len]
    }

    /// The unused tail, to be filled and then committed with [`Self::advance`].
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.len..]
    }

    pub fn advance(&mut self, count: usize) {
        assert!(count <= self.free(), "advance past buffer capacity");
        self.len += count;
    }

    /// Appends all of `data`, or nothing if it does not fit.
    pub fn append(&mut self, data: &[u8]) -> bool {
        if data.len() > self.free() {
            return false;
        }
        self.storage[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        true
    }

    /// Drops `count` bytes from the front and moves the rest down.
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.len);
        self.storage.copy_within(count..self.len, 0);
        self.len -= count;
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}
