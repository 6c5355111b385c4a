use bitflags::bitflags;

use xgq::IoAccessor;
use xgq_protocol as proto;

bitflags! {
    /// AP-control register bits of an HLS-generated block (AXI-lite
    /// convention).
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ApCtrl: u32 {
        const START = proto::AP_START;
        const DONE = proto::AP_DONE;
        const IDLE = proto::AP_IDLE;
        const READY = proto::AP_READY;
        const CONTINUE = proto::AP_CONTINUE;
    }
}

/// Consumer-side state machine of one compute unit: its control-register
/// address and a cached copy of the AP-control status bits.
///
/// Mutated only by the scheduler iteration that owns it; never shared. The
/// cache exists so the hot path touches hardware once per poll, with
/// [`CuDispatcher::start`]/[`CuDispatcher::complete`] updating it
/// speculatively and [`CuDispatcher::load_status`] reconciling.
#[derive(Debug)]
pub struct CuDispatcher {
    ctrl_addr: u64,
    flavor: u32,
    status: ApCtrl,
}

impl CuDispatcher {
    pub fn new(ctrl_addr: u64, flavor: u32) -> CuDispatcher {
        CuDispatcher {
            ctrl_addr,
            flavor,
            status: ApCtrl::empty(),
        }
    }

    pub fn ctrl_addr(&self) -> u64 {
        self.ctrl_addr
    }

    pub fn flavor(&self) -> u32 {
        self.flavor
    }

    pub fn status(&self) -> ApCtrl {
        self.status
    }

    /// Accepting input: the block advertises IDLE (nothing running) or READY
    /// (current run has latched its arguments).
    pub fn is_ready(&self) -> bool {
        self.status.intersects(ApCtrl::IDLE | ApCtrl::READY)
    }

    pub fn is_done(&self) -> bool {
        self.status.contains(ApCtrl::DONE)
    }

    /// Re-reads the control register into the cache.
    ///
    /// Quirk of the target AXI-lite control protocol: when a previously set
    /// AP_START is observed cleared, the hardware has accepted the command
    /// and is guaranteed to expose AP_READY, but some shells do not assert
    /// the bit in the same cycle. The dispatcher ORs it in as a derived
    /// fact. This is erratum-specific, not a general assumption.
    pub fn load_status(&mut self, io: &mut dyn IoAccessor) {
        let fresh = ApCtrl::from_bits_truncate(io.read32(self.ctrl_addr));
        let accepted = self.status.contains(ApCtrl::START) && !fresh.contains(ApCtrl::START);
        self.status = fresh;
        if accepted {
            self.status |= ApCtrl::READY;
        }
    }

    /// Marshals the argument words into the block's argument region, then
    /// sets AP_START. Valid only while [`CuDispatcher::is_ready`].
    ///
    /// The cached IDLE/READY bits are cleared speculatively; a subsequent
    /// `load_status` reconciles with the hardware.
    pub fn start(&mut self, io: &mut dyn IoAccessor, args: &[u32]) {
        debug_assert!(self.is_ready());
        for (i, word) in args.iter().enumerate() {
            io.write32(self.ctrl_addr + proto::CU_ARG_OFFSET + i as u64 * 4, *word);
        }
        io.write32(self.ctrl_addr, proto::AP_START);
        self.status.remove(ApCtrl::IDLE | ApCtrl::READY);
        self.status.insert(ApCtrl::START);
    }

    /// Acknowledges a completed run: pulses AP_CONTINUE so the block clears
    /// its own AP_DONE, and drops the cached bit. Valid only from Done.
    pub fn complete(&mut self, io: &mut dyn IoAccessor) {
        debug_assert!(self.is_done());
        io.write32(self.ctrl_addr, proto::AP_CONTINUE);
        self.status.remove(ApCtrl::DONE);
    }
}
