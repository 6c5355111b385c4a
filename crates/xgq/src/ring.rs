use crate::io::IoAccessor;

/// One direction (submission or completion) of a queue pair: slot geometry,
/// locally cached cursors, and the three addresses the peer protocol is built
/// on.
///
/// Cursors are free-running 32-bit counters that are never reset on
/// wraparound; wraparound only exists when a cursor is masked down to a slot
/// index. Exactly one side ever writes `produced` and exactly the other side
/// ever writes `consumed`; each side reads the peer-owned cursor lazily via
/// `refresh_*`, and only when its cached view says it cannot make progress.
#[derive(Debug)]
pub struct Ring {
    slot_count: u32,
    slot_size: u32,
    produced: u32,
    consumed: u32,
    produced_addr: u64,
    consumed_addr: u64,
    slot_addr: u64,
}

impl Ring {
    pub fn new(
        produced_addr: u64,
        consumed_addr: u64,
        slot_addr: u64,
        slot_count: u32,
        slot_size: u32,
    ) -> Ring {
        debug_assert!(slot_count.is_power_of_two());
        Ring {
            slot_count,
            slot_size,
            produced: 0,
            consumed: 0,
            produced_addr,
            consumed_addr,
            slot_addr,
        }
    }

    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    pub fn slot_size(&self) -> u32 {
        self.slot_size
    }

    pub fn produced(&self) -> u32 {
        self.produced
    }

    pub fn consumed(&self) -> u32 {
        self.consumed
    }

    /// `produced - consumed` is an invariant of `[0, slot_count]`, across
    /// cursor wraparound.
    pub fn is_full(&self) -> bool {
        self.produced.wrapping_sub(self.consumed) == self.slot_count
    }

    pub fn is_empty(&self) -> bool {
        self.produced == self.consumed
    }

    /// Re-reads the peer-owned consumed cursor. Producer side only, and only
    /// worth calling when the cached view says "full".
    pub fn refresh_consumed(&mut self, io: &mut dyn IoAccessor, double_read: bool) {
        self.consumed = read_cursor(io, self.consumed_addr, double_read);
    }

    /// Re-reads the peer-owned produced cursor. Consumer side only, and only
    /// worth calling when the cached view says "empty".
    pub fn refresh_produced(&mut self, io: &mut dyn IoAccessor, double_read: bool) {
        self.produced = read_cursor(io, self.produced_addr, double_read);
    }

    pub fn produced_slot_addr(&self) -> u64 {
        self.slot_addr + self.slot_size as u64 * (self.produced & (self.slot_count - 1)) as u64
    }

    pub fn consumed_slot_addr(&self) -> u64 {
        self.slot_addr + self.slot_size as u64 * (self.consumed & (self.slot_count - 1)) as u64
    }

    pub fn advance_produced(&mut self) {
        self.produced = self.produced.wrapping_add(1);
    }

    /// Rolls back one unpublished `advance_produced`. Valid only while the
    /// advance has not been published to the peer.
    pub fn retreat_produced(&mut self) {
        self.produced = self.produced.wrapping_sub(1);
    }

    pub fn advance_consumed(&mut self) {
        self.consumed = self.consumed.wrapping_add(1);
    }

    /// Publishes the local produced cursor. This is the only point at which
    /// the peer may observe new entries, so it must come strictly after the
    /// slot payload writes; the ordering is enforced by call order, no
    /// hardware barrier is assumed.
    pub fn publish_produced(&mut self, io: &mut dyn IoAccessor) {
        io.write32(self.produced_addr, self.produced);
    }

    /// Publishes the local consumed cursor, returning the slots read so far
    /// to the peer. Must come strictly after the last read of those slots.
    pub fn publish_consumed(&mut self, io: &mut dyn IoAccessor) {
        io.write32(self.consumed_addr, self.consumed);
    }

    /// Discards any stale entries left over from a previous session: aligns
    /// both cached cursors to the peer's current produced position and
    /// publishes the consumed cursor. Allocator side only.
    pub fn soft_reset(&mut self, io: &mut dyn IoAccessor, double_read: bool) {
        let produced = read_cursor(io, self.produced_addr, double_read);
        self.produced = produced;
        self.consumed = produced;
        self.publish_consumed(io);
    }

    /// Adopts the peer's current cursor positions without resetting them.
    /// Attach side only; already-queued work must be preserved.
    pub fn fast_forward(&mut self, io: &mut dyn IoAccessor, double_read: bool) {
        self.produced = read_cursor(io, self.produced_addr, double_read);
        self.consumed = read_cursor(io, self.consumed_addr, double_read);
    }
}

fn read_cursor(io: &mut dyn IoAccessor, addr: u64, double_read: bool) -> u32 {
    if double_read {
        io.double_read32(addr)
    } else {
        io.read32(addr)
    }
}
