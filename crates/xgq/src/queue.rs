use bitflags::bitflags;

use xgq_protocol as proto;
use xgq_protocol::XgqHeader;

use crate::error::{Result, XgqError};
use crate::io::{read_words, write_words, IoAccessor};
use crate::ring::Ring;

bitflags! {
    /// Queue behavior flags, persisted in the header and propagated from the
    /// allocating side to the attaching side.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct QueueFlags: u32 {
        /// Cursor reads must use the double-read erratum workaround.
        const NEEDS_DOUBLE_READ = proto::XGQ_FLAG_NEEDS_DOUBLE_READ;
        /// Produced cursors live in the header itself; when clear they live
        /// in doorbell registers and both sides supply override addresses.
        const IN_MEM_PRODUCED = proto::XGQ_FLAG_IN_MEM_PRODUCED;
    }
}

/// Which ring is "mine to produce".
///
/// A Client produces into the submission ring and consumes from the
/// completion ring; a Server does the opposite. The role is a deployment-time
/// property (host driver vs. scheduler firmware), fixed at construction and
/// never switched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Doorbell-register addresses for the produced cursors, used when they do
/// not live in the header memory.
#[derive(Clone, Copy, Debug)]
pub struct ProducedOverride {
    pub sq: u64,
    pub cq: u64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct QueueOptions {
    /// Apply the double-read workaround to cursor reads. Allocator side only;
    /// an attacher learns it from the header flags.
    pub needs_double_read: bool,
    pub produced_override: Option<ProducedOverride>,
    /// Caps the slot count chosen by `allocate`'s doubling search. The
    /// minimum-slots invariant is re-validated after capping.
    pub max_slots: Option<u32>,
}

/// One XGQ: a submission ring and a completion ring sharing a header at the
/// base of a ring region.
///
/// Created by [`XgqQueue::allocate`] on one side of the link and
/// [`XgqQueue::attach`] on the other; destroyed only by process or firmware
/// teardown. A queue instance assumes single-owner access; callers sharing
/// one across threads must serialize themselves.
#[derive(Debug)]
pub struct XgqQueue {
    role: Role,
    base_addr: u64,
    flags: QueueFlags,
    sq: Ring,
    cq: Ring,
}

impl XgqQueue {
    /// Greenfield construction: sizes the rings, writes the header, and
    /// publishes it to the peer.
    ///
    /// The slot count is the largest power of two such that header plus both
    /// rings fit in `total_len` (found by doubling), then capped by
    /// `opts.max_slots` if set. Both rings get a soft reset - any produced
    /// cursor left over from a previous session is adopted and immediately
    /// consumed, discarding stale entries.
    ///
    /// Write ordering is the publication barrier: the magic word is written
    /// as `0` first and set to the sentinel only after every other header
    /// field and both cursor resets are durable, so an attacher that sees the
    /// sentinel sees a fully initialized header.
    pub fn allocate(
        io: &mut dyn IoAccessor,
        base_addr: u64,
        total_len: u64,
        slot_size: u32,
        role: Role,
        opts: QueueOptions,
    ) -> Result<XgqQueue> {
        if slot_size < proto::XGQ_SQ_HDR_SIZE || slot_size % 4 != 0 {
            return Err(XgqError::InvalidArgument(
                "submission slot size must be a word multiple of at least 8 bytes",
            ));
        }

        let per_slot = (slot_size + proto::XGQ_CQ_SLOT_SIZE) as u64;
        let fits = |count: u64| proto::XGQ_HEADER_SIZE as u64 + count * per_slot <= total_len;

        if !fits(proto::XGQ_MIN_SLOTS as u64) {
            return Err(XgqError::TooSmall {
                total_len,
                slot_size,
                min_slots: proto::XGQ_MIN_SLOTS,
            });
        }
        let mut slot_count = proto::XGQ_MIN_SLOTS;
        while slot_count < (1 << 30) && fits(slot_count as u64 * 2) {
            slot_count *= 2;
        }

        if let Some(cap) = opts.max_slots {
            // Round a non-power-of-two cap down; a cap below the protocol
            // minimum is a caller bug, not something to paper over.
            let capped = if cap == 0 { 0 } else { 1 << (31 - cap.leading_zeros()) };
            if capped < proto::XGQ_MIN_SLOTS {
                return Err(XgqError::TooSmall {
                    total_len,
                    slot_size,
                    min_slots: proto::XGQ_MIN_SLOTS,
                });
            }
            slot_count = slot_count.min(capped);
        }

        let sq_offset = proto::XGQ_HEADER_SIZE;
        let cq_offset = sq_offset + slot_count * slot_size;

        let mut flags = QueueFlags::empty();
        if opts.needs_double_read {
            flags |= QueueFlags::NEEDS_DOUBLE_READ;
        }
        if opts.produced_override.is_none() {
            flags |= QueueFlags::IN_MEM_PRODUCED;
        }

        let hdr = XgqHeader {
            magic: 0, // provisional; the sentinel goes in last
            version: proto::xgq_version(proto::XGQ_MAJOR, proto::XGQ_MINOR),
            slot_count,
            sq_offset,
            sq_slot_size: slot_size,
            cq_offset,
            sq_consumed: 0,
            cq_consumed: 0,
            flags: flags.bits(),
            sq_produced: 0,
            cq_produced: 0,
        };
        write_words(io, base_addr, &hdr.to_words());

        let mut queue = XgqQueue::from_header(role, base_addr, &hdr, flags, opts.produced_override);
        let dr = queue.double_read();
        queue.sq.soft_reset(io, dr);
        queue.cq.soft_reset(io, dr);

        io.write32(base_addr, proto::XGQ_MAGIC);
        Ok(queue)
    }

    /// Joins an already-allocated ring region.
    ///
    /// Returns [`XgqError::NotReady`] until the allocator has published the
    /// magic sentinel; the caller polls. Local cursors are fast-forwarded to
    /// the peer's current positions - unlike allocation, attaching must
    /// preserve already-queued work.
    pub fn attach(
        io: &mut dyn IoAccessor,
        base_addr: u64,
        role: Role,
        opts: QueueOptions,
    ) -> Result<XgqQueue> {
        if io.read32(base_addr) != proto::XGQ_MAGIC {
            return Err(XgqError::NotReady);
        }

        let mut words = [0u32; 11];
        read_words(io, base_addr, &mut words);
        let hdr = XgqHeader::from_words(words);

        let major = proto::xgq_version_major(hdr.version);
        if major != proto::XGQ_MAJOR {
            return Err(XgqError::UnsupportedVersion {
                major,
                minor: proto::xgq_version_minor(hdr.version),
                expected: proto::XGQ_MAJOR,
            });
        }
        if hdr.slot_count < proto::XGQ_MIN_SLOTS || !hdr.slot_count.is_power_of_two() {
            return Err(XgqError::Corrupt {
                slot_count: hdr.slot_count,
            });
        }

        let flags = QueueFlags::from_bits_truncate(hdr.flags);
        let produced_override = if flags.contains(QueueFlags::IN_MEM_PRODUCED) {
            None
        } else if opts.produced_override.is_some() {
            opts.produced_override
        } else {
            return Err(XgqError::InvalidArgument(
                "produced cursors live in registers; override addresses required",
            ));
        };

        let mut queue = XgqQueue::from_header(role, base_addr, &hdr, flags, produced_override);
        let dr = queue.double_read();
        queue.sq.fast_forward(io, dr);
        queue.cq.fast_forward(io, dr);
        Ok(queue)
    }

    fn from_header(
        role: Role,
        base_addr: u64,
        hdr: &XgqHeader,
        flags: QueueFlags,
        produced_override: Option<ProducedOverride>,
    ) -> XgqQueue {
        let sq_produced_addr = produced_override
            .map(|o| o.sq)
            .unwrap_or(base_addr + proto::XGQ_HDR_SQ_PRODUCED as u64 * 4);
        let cq_produced_addr = produced_override
            .map(|o| o.cq)
            .unwrap_or(base_addr + proto::XGQ_HDR_CQ_PRODUCED as u64 * 4);

        let sq = Ring::new(
            sq_produced_addr,
            base_addr + proto::XGQ_HDR_SQ_CONSUMED as u64 * 4,
            base_addr + hdr.sq_offset as u64,
            hdr.slot_count,
            hdr.sq_slot_size,
        );
        let cq = Ring::new(
            cq_produced_addr,
            base_addr + proto::XGQ_HDR_CQ_CONSUMED as u64 * 4,
            base_addr + hdr.cq_offset as u64,
            hdr.slot_count,
            proto::XGQ_CQ_SLOT_SIZE,
        );

        XgqQueue {
            role,
            base_addr,
            flags,
            sq,
            cq,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn base_addr(&self) -> u64 {
        self.base_addr
    }

    pub fn flags(&self) -> QueueFlags {
        self.flags
    }

    pub fn slot_count(&self) -> u32 {
        self.sq.slot_count()
    }

    pub fn sq_slot_size(&self) -> u32 {
        self.sq.slot_size()
    }

    /// Argument bytes a submission slot can carry after the command header.
    pub fn sq_payload_capacity(&self) -> u32 {
        self.sq.slot_size() - proto::XGQ_SQ_HDR_SIZE
    }

    /// Total region bytes a queue with this geometry occupies.
    pub fn region_len(&self) -> u64 {
        proto::XGQ_HEADER_SIZE as u64
            + self.slot_count() as u64 * (self.sq.slot_size() + proto::XGQ_CQ_SLOT_SIZE) as u64
    }

    fn double_read(&self) -> bool {
        self.flags.contains(QueueFlags::NEEDS_DOUBLE_READ)
    }

    // Role duality: which ring is mine to produce is fixed at construction,
    // so this is a match, not runtime polymorphism.
    fn producer_ring(&mut self) -> &mut Ring {
        match self.role {
            Role::Client => &mut self.sq,
            Role::Server => &mut self.cq,
        }
    }

    fn consumer_ring(&mut self) -> &mut Ring {
        match self.role {
            Role::Client => &mut self.cq,
            Role::Server => &mut self.sq,
        }
    }

    /// Reserves the next producer slot and returns its address. The entry is
    /// not visible to the peer until [`XgqQueue::notify_produced`]; several
    /// slots may be filled under one notify to batch publications.
    pub fn try_produce(&mut self, io: &mut dyn IoAccessor) -> Result<u64> {
        let dr = self.double_read();
        let ring = self.producer_ring();
        if ring.is_full() {
            ring.refresh_consumed(io, dr);
            if ring.is_full() {
                return Err(XgqError::NoSpace);
            }
        }
        let addr = ring.produced_slot_addr();
        ring.advance_produced();
        Ok(addr)
    }

    /// Rolls back the most recent unnotified [`XgqQueue::try_produce`].
    pub fn cancel_produce(&mut self) {
        self.producer_ring().retreat_produced();
    }

    /// Claims the oldest unconsumed peer entry and returns its address. The
    /// slot is owned by the caller until [`XgqQueue::notify_consumed`]
    /// returns it to the peer; all reads of the slot must happen before that.
    pub fn try_consume(&mut self, io: &mut dyn IoAccessor) -> Result<u64> {
        let dr = self.double_read();
        let ring = self.consumer_ring();
        if ring.is_empty() {
            ring.refresh_produced(io, dr);
            if ring.is_empty() {
                return Err(XgqError::Empty);
            }
        }
        let addr = ring.consumed_slot_addr();
        ring.advance_consumed();
        Ok(addr)
    }

    pub fn notify_produced(&mut self, io: &mut dyn IoAccessor) {
        self.producer_ring().publish_produced(io);
    }

    pub fn notify_consumed(&mut self, io: &mut dyn IoAccessor) {
        self.consumer_ring().publish_consumed(io);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::RamRegion;

    fn ram() -> RamRegion {
        RamRegion::new(0x1000, 64 * 1024)
    }

    #[test]
    fn allocate_picks_largest_fitting_power_of_two() {
        let mut io = ram();
        // header (44) + n * (64 + 16) <= 4096 -> n = 32 fits, n = 64 does not.
        let q = XgqQueue::allocate(
            &mut io,
            0x1000,
            4096,
            64,
            Role::Client,
            QueueOptions::default(),
        )
        .unwrap();
        assert_eq!(q.slot_count(), 32);
        assert_eq!(q.sq_slot_size(), 64);
        assert!(q.region_len() <= 4096);
    }

    #[test]
    fn allocate_rejects_region_below_minimum() {
        let mut io = ram();
        let err = XgqQueue::allocate(
            &mut io,
            0x1000,
            128,
            64,
            Role::Client,
            QueueOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, XgqError::TooSmall { .. }));
    }

    #[test]
    fn allocate_rejects_bad_slot_size() {
        let mut io = ram();
        for bad in [0u32, 4, 62] {
            let err = XgqQueue::allocate(
                &mut io,
                0x1000,
                4096,
                bad,
                Role::Client,
                QueueOptions::default(),
            )
            .unwrap_err();
            assert!(matches!(err, XgqError::InvalidArgument(_)));
        }
    }

    #[test]
    fn max_slots_cap_is_honored_and_revalidated() {
        let mut io = ram();
        let opts = QueueOptions {
            max_slots: Some(9), // not a power of two; rounds down to 8
            ..Default::default()
        };
        let q = XgqQueue::allocate(&mut io, 0x1000, 4096, 64, Role::Client, opts).unwrap();
        assert_eq!(q.slot_count(), 8);

        let opts = QueueOptions {
            max_slots: Some(1),
            ..Default::default()
        };
        let err = XgqQueue::allocate(&mut io, 0x1000, 4096, 64, Role::Client, opts).unwrap_err();
        assert!(matches!(err, XgqError::TooSmall { .. }));
    }

    #[test]
    fn attach_before_sentinel_is_not_ready() {
        let mut io = ram();
        let err =
            XgqQueue::attach(&mut io, 0x1000, Role::Server, QueueOptions::default()).unwrap_err();
        assert_eq!(err, XgqError::NotReady);

        // A partially written header (magic still provisional) is NotReady
        // too, never Corrupt.
        let hdr = xgq_protocol::XgqHeader {
            magic: 0,
            version: xgq_protocol::xgq_version(1, 0),
            slot_count: 5, // would be Corrupt if validated
            ..Default::default()
        };
        write_words(&mut io, 0x1000, &hdr.to_words());
        let err =
            XgqQueue::attach(&mut io, 0x1000, Role::Server, QueueOptions::default()).unwrap_err();
        assert_eq!(err, XgqError::NotReady);
    }

    #[test]
    fn attach_rejects_major_version_mismatch() {
        let mut io = ram();
        XgqQueue::allocate(
            &mut io,
            0x1000,
            4096,
            64,
            Role::Client,
            QueueOptions::default(),
        )
        .unwrap();
        io.write32(
            0x1000 + xgq_protocol::XGQ_HDR_VERSION as u64 * 4,
            xgq_protocol::xgq_version(2, 0),
        );
        let err =
            XgqQueue::attach(&mut io, 0x1000, Role::Server, QueueOptions::default()).unwrap_err();
        assert_eq!(
            err,
            XgqError::UnsupportedVersion {
                major: 2,
                minor: 0,
                expected: 1
            }
        );
    }

    #[test]
    fn attach_rejects_corrupt_slot_count() {
        let mut io = ram();
        XgqQueue::allocate(
            &mut io,
            0x1000,
            4096,
            64,
            Role::Client,
            QueueOptions::default(),
        )
        .unwrap();
        for bad in [0u32, 1, 3, 24] {
            io.write32(0x1000 + xgq_protocol::XGQ_HDR_SLOT_COUNT as u64 * 4, bad);
            let err = XgqQueue::attach(&mut io, 0x1000, Role::Server, QueueOptions::default())
                .unwrap_err();
            assert_eq!(err, XgqError::Corrupt { slot_count: bad });
        }
    }

    #[test]
    fn attach_mirrors_allocated_geometry() {
        let mut io = ram();
        let client = XgqQueue::allocate(
            &mut io,
            0x1000,
            4096,
            64,
            Role::Client,
            QueueOptions::default(),
        )
        .unwrap();
        let server =
            XgqQueue::attach(&mut io, 0x1000, Role::Server, QueueOptions::default()).unwrap();
        assert_eq!(server.slot_count(), client.slot_count());
        assert_eq!(server.sq_slot_size(), client.sq_slot_size());
        assert_eq!(server.flags(), client.flags());
    }

    #[test]
    fn allocate_soft_reset_adopts_stale_doorbell_cursor() {
        let mut io = ram();
        let ovr = ProducedOverride {
            sq: 0x9000,
            cq: 0x9008,
        };
        // A previous session left the sq doorbell at 5. Allocation cannot
        // zero a hardware register, so it adopts the value and discards the
        // backlog by aligning the consumed cursor to it.
        io.write32(0x9000, 5);
        let opts = QueueOptions {
            produced_override: Some(ovr),
            ..Default::default()
        };
        XgqQueue::allocate(&mut io, 0x1000, 4096, 64, Role::Client, opts).unwrap();
        assert_eq!(
            io.read32(0x1000 + xgq_protocol::XGQ_HDR_SQ_CONSUMED as u64 * 4),
            5
        );

        let mut server = XgqQueue::attach(&mut io, 0x1000, Role::Server, opts).unwrap();
        assert!(matches!(server.try_consume(&mut io), Err(XgqError::Empty)));
    }

    #[test]
    fn attach_requires_override_when_cursors_are_registers() {
        let mut io = ram();
        let opts = QueueOptions {
            produced_override: Some(ProducedOverride {
                sq: 0x9000,
                cq: 0x9008,
            }),
            ..Default::default()
        };
        XgqQueue::allocate(&mut io, 0x1000, 4096, 64, Role::Client, opts).unwrap();
        let err =
            XgqQueue::attach(&mut io, 0x1000, Role::Server, QueueOptions::default()).unwrap_err();
        assert!(matches!(err, XgqError::InvalidArgument(_)));
    }

    #[test]
    fn produce_not_visible_until_notify() {
        let mut io = ram();
        let mut client = XgqQueue::allocate(
            &mut io,
            0x1000,
            4096,
            64,
            Role::Client,
            QueueOptions::default(),
        )
        .unwrap();
        let mut server =
            XgqQueue::attach(&mut io, 0x1000, Role::Server, QueueOptions::default()).unwrap();

        let slot = client.try_produce(&mut io).unwrap();
        io.write32(slot, 0xaaaa_5555);
        assert!(matches!(server.try_consume(&mut io), Err(XgqError::Empty)));

        client.notify_produced(&mut io);
        let got = server.try_consume(&mut io).unwrap();
        assert_eq!(got, slot);
        assert_eq!(io.read32(got), 0xaaaa_5555);
    }

    #[test]
    fn cancel_produce_rolls_back_reservation() {
        let mut io = ram();
        let mut client = XgqQueue::allocate(
            &mut io,
            0x1000,
            4096,
            64,
            Role::Client,
            QueueOptions::default(),
        )
        .unwrap();
        let first = client.try_produce(&mut io).unwrap();
        client.cancel_produce();
        // The same slot is handed out again.
        assert_eq!(client.try_produce(&mut io).unwrap(), first);
    }

    #[test]
    fn producer_blocks_at_slot_count_outstanding() {
        let mut io = ram();
        let mut client = XgqQueue::allocate(
            &mut io,
            0x1000,
            1024,
            64,
            Role::Client,
            QueueOptions::default(),
        )
        .unwrap();
        let mut server =
            XgqQueue::attach(&mut io, 0x1000, Role::Server, QueueOptions::default()).unwrap();
        let n = client.slot_count();

        for _ in 0..n {
            client.try_produce(&mut io).unwrap();
        }
        client.notify_produced(&mut io);
        assert!(matches!(
            client.try_produce(&mut io),
            Err(XgqError::NoSpace)
        ));

        // Freeing one slot on the consumer side unblocks the producer after
        // the cursor refresh.
        server.try_consume(&mut io).unwrap();
        server.notify_consumed(&mut io);
        client.try_produce(&mut io).unwrap();
    }
}
