/// Abstraction for 32-bit access to the shared ring region.
///
/// An address may resolve to true memory or to a memory-mapped doorbell
/// register; reads are defined as `&mut self` to allow implementations with
/// side effects. This layer never fails and never allocates: addresses that
/// fall outside the mapped region behave like an open bus (reads return
/// `0xffff_ffff`, writes are dropped), matching what a PCIe master abort
/// looks like to the driver.
pub trait IoAccessor {
    fn read32(&mut self, addr: u64) -> u32;
    fn write32(&mut self, addr: u64, val: u32);

    /// Reads `addr` until two consecutive reads agree.
    ///
    /// Workaround for a BRAM read/write collision erratum that can return a
    /// torn value on the first read. Callers select this over [`read32`]
    /// based on the queue header's `NEEDS_DOUBLE_READ` flag; it is not a
    /// default behavior.
    ///
    /// [`read32`]: IoAccessor::read32
    fn double_read32(&mut self, addr: u64) -> u32 {
        let mut prev = self.read32(addr);
        loop {
            let cur = self.read32(addr);
            if cur == prev {
                return cur;
            }
            prev = cur;
        }
    }
}

/// Reads `out.len()` consecutive words starting at `addr`.
pub fn read_words(io: &mut dyn IoAccessor, addr: u64, out: &mut [u32]) {
    for (i, word) in out.iter_mut().enumerate() {
        *word = io.read32(addr + i as u64 * 4);
    }
}

/// Writes `words` to consecutive addresses starting at `addr`.
pub fn write_words(io: &mut dyn IoAccessor, addr: u64, words: &[u32]) {
    for (i, word) in words.iter().enumerate() {
        io.write32(addr + i as u64 * 4, *word);
    }
}

/// Plain-RAM accessor over an owned little-endian byte buffer.
///
/// This backs the host-side emulation shim and the test suites; on real
/// hardware the accessor wraps a mapped BAR instead.
pub struct RamRegion {
    base: u64,
    buf: Vec<u8>,
}

impl RamRegion {
    pub fn new(base: u64, len: usize) -> Self {
        RamRegion {
            base,
            buf: vec![0u8; len],
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    fn offset(&self, addr: u64) -> Option<usize> {
        let off = addr.checked_sub(self.base)? as usize;
        if off + 4 > self.buf.len() {
            return None;
        }
        Some(off)
    }
}

impl IoAccessor for RamRegion {
    fn read32(&mut self, addr: u64) -> u32 {
        match self.offset(addr) {
            Some(off) => u32::from_le_bytes(self.buf[off..off + 4].try_into().unwrap()),
            None => 0xffff_ffff,
        }
    }

    fn write32(&mut self, addr: u64, val: u32) {
        if let Some(off) = self.offset(addr) {
            self.buf[off..off + 4].copy_from_slice(&val.to_le_bytes());
        }
    }
}
