//! The embedded runtime's main loop: a control XGQ own to the firmware plus
//! the per-epoch CU queue layout it builds from the host's configuration
//! handshake.

use xgq::{write_words, IoAccessor, QueueOptions, Result, Role, XgqError, XgqQueue};
use xgq_protocol as proto;
use xgq_protocol::{xgq_version, CfgCuPayload, CqEntry, SqHdr};

use crate::ctrl::{self, ControlCommand, Features};
use crate::cu::{ApCtrl, CuDispatcher};
use crate::cu_queue::{Binding, CuQueue, Progress};
use crate::{CycleCounter, InterruptLine};

/// Upper bound on the CU table. The shared-region layout cannot express more
/// than this many dedicated queues anyway.
pub const MAX_CUS: u32 = 128;

/// Register accesses timed per target by `ACCESS_VALID`.
const ACCESS_ITERS: u64 = 16;

#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    /// Device-visible base of the whole shared ring region.
    pub region_base: u64,
    pub region_len: u64,
    /// Leading part of the region reserved for the control queue; CU queues
    /// are carved out of the remainder at `CFG_END` time.
    pub ctrl_region_len: u64,
    pub ctrl_slot_size: u32,
    pub needs_double_read: bool,
}

/// Externally observable lifecycle phase, for hosts polling diagnostics and
/// for tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Configuring,
    Ready,
    ShuttingDown,
}

enum State {
    Idle,
    /// `CFG_CU` table being collected; `CFG_END` refuses to proceed until
    /// every index has arrived.
    Configuring { pending: Vec<Option<CfgCuPayload>> },
    Ready,
    ShuttingDown,
}

pub struct Scheduler {
    cfg: SchedulerConfig,
    ctrl: XgqQueue,
    state: State,
    features: Features,
    cus: Vec<CuDispatcher>,
    cu_queues: Vec<CuQueue>,
    /// Per-CU `(region offset, kind)` reported by `QUERY_CU`; kind 0 is a
    /// dedicated queue, 1 the shared one.
    cu_offsets: Vec<(u32, u32)>,
}

impl Scheduler {
    /// Brings up the control queue and publishes it to the host. CU queues
    /// do not exist until the host completes a configuration epoch.
    pub fn new(io: &mut dyn IoAccessor, cfg: SchedulerConfig) -> Result<Scheduler> {
        if cfg.ctrl_region_len > cfg.region_len {
            return Err(XgqError::InvalidArgument(
                "control region exceeds the shared region",
            ));
        }
        let ctrl = XgqQueue::allocate(
            io,
            cfg.region_base,
            cfg.ctrl_region_len,
            cfg.ctrl_slot_size,
            Role::Server,
            QueueOptions {
                needs_double_read: cfg.needs_double_read,
                ..QueueOptions::default()
            },
        )?;
        tracing::info!(
            base = cfg.region_base,
            slots = ctrl.slot_count(),
            "control queue online"
        );
        Ok(Scheduler {
            cfg,
            ctrl,
            state: State::Idle,
            features: Features::empty(),
            cus: Vec::new(),
            cu_queues: Vec::new(),
            cu_offsets: Vec::new(),
        })
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            State::Idle => Phase::Idle,
            State::Configuring { .. } => Phase::Configuring,
            State::Ready => Phase::Ready,
            State::ShuttingDown => Phase::ShuttingDown,
        }
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub fn num_cus(&self) -> usize {
        self.cus.len()
    }

    pub fn cu_queues(&self) -> &[CuQueue] {
        &self.cu_queues
    }

    /// One cooperative iteration: the control queue is drained to exhaustion
    /// first (configuration and diagnostics must never starve behind CU
    /// work), then each CU queue gets one step.
    pub fn run_once(
        &mut self,
        io: &mut dyn IoAccessor,
        clock: &mut dyn CycleCounter,
        intr: &mut dyn InterruptLine,
    ) -> Progress {
        let mut progress = Progress::NoProgress;

        loop {
            // Reserve the completion slot before consuming, so a full
            // completion ring stalls the command instead of losing it.
            let cq_slot = match self.ctrl.try_produce(io) {
                Ok(addr) => addr,
                Err(_) => break,
            };
            let sq_slot = match self.ctrl.try_consume(io) {
                Ok(addr) => addr,
                Err(_) => {
                    self.ctrl.cancel_produce();
                    break;
                }
            };
            let (hdr, cmd) = ctrl::decode(io, sq_slot);
            let entry = self.handle_control(io, clock, intr, &hdr, cmd, sq_slot);
            self.ctrl.notify_consumed(io);
            write_words(io, cq_slot, &entry.to_words());
            self.ctrl.notify_produced(io);
            progress = Progress::Progressed;
        }

        if matches!(self.state, State::Ready) {
            for queue in &mut self.cu_queues {
                if queue.process(io, &mut self.cus, self.features, intr) == Progress::Progressed {
                    progress = Progress::Progressed;
                }
            }
        }

        progress
    }

    /// Loops until the host sends `EXIT`. Graceful halt, not a fault.
    pub fn run(
        &mut self,
        io: &mut dyn IoAccessor,
        clock: &mut dyn CycleCounter,
        intr: &mut dyn InterruptLine,
    ) {
        while !matches!(self.state, State::ShuttingDown) {
            if self.run_once(io, clock, intr) == Progress::NoProgress {
                std::hint::spin_loop();
            }
        }
    }

    fn handle_control(
        &mut self,
        io: &mut dyn IoAccessor,
        clock: &mut dyn CycleCounter,
        intr: &mut dyn InterruptLine,
        hdr: &SqHdr,
        cmd: ControlCommand,
        slot_addr: u64,
    ) -> CqEntry {
        match cmd {
            ControlCommand::CfgStart(payload) => {
                if payload.num_cus == 0 || payload.num_cus > MAX_CUS {
                    return reply(hdr, proto::XGQ_RCODE_INVALID_ARGUMENT);
                }
                // A fresh epoch drops whatever the previous one built.
                self.features = Features::from_bits_truncate(payload.features);
                self.cus.clear();
                self.cu_queues.clear();
                self.cu_offsets.clear();
                self.state = State::Configuring {
                    pending: vec![None; payload.num_cus as usize],
                };
                tracing::debug!(
                    num_cus = payload.num_cus,
                    features = ?self.features,
                    "configuration epoch started"
                );
                reply(hdr, proto::XGQ_RCODE_OK)
            }
            ControlCommand::CfgCu { cu_idx, cfg } => match &mut self.state {
                State::Configuring { pending } if (cu_idx as usize) < pending.len() => {
                    pending[cu_idx as usize] = Some(cfg);
                    reply(hdr, proto::XGQ_RCODE_OK)
                }
                _ => reply(hdr, proto::XGQ_RCODE_INVALID_ARGUMENT),
            },
            ControlCommand::CfgEnd => self.handle_cfg_end(io, intr, hdr),
            ControlCommand::QueryCu { cu_idx } => {
                match self.cu_offsets.get(cu_idx as usize) {
                    Some(&(offset, kind)) if matches!(self.state, State::Ready) => {
                        reply_data(hdr, proto::XGQ_RCODE_OK, [offset, kind])
                    }
                    _ => reply(hdr, proto::XGQ_RCODE_INVALID_ARGUMENT),
                }
            }
            ControlCommand::ClockCalib => {
                let cycles = clock.cycles();
                reply_data(
                    hdr,
                    proto::XGQ_RCODE_OK,
                    [cycles as u32, (cycles >> 32) as u32],
                )
            }
            ControlCommand::AccessValid => self.handle_access_valid(io, clock, hdr, slot_addr),
            ControlCommand::DataIntegrity => self.handle_data_integrity(io, hdr, slot_addr),
            ControlCommand::Identify => reply_data(
                hdr,
                proto::XGQ_RCODE_OK,
                [xgq_version(proto::XGQ_MAJOR, proto::XGQ_MINOR), 0],
            ),
            ControlCommand::Exit => {
                tracing::info!("exit requested, shutting down");
                self.state = State::ShuttingDown;
                reply(hdr, proto::XGQ_RCODE_OK)
            }
            ControlCommand::Malformed(opcode) => {
                tracing::warn!(opcode, count = hdr.count, "malformed control command");
                reply(hdr, proto::XGQ_RCODE_INVALID_ARGUMENT)
            }
            ControlCommand::Unknown(opcode) => {
                tracing::warn!(opcode, "unrecognized control opcode");
                reply(hdr, proto::XGQ_RCODE_NOT_SUPPORTED)
            }
        }
    }

    /// Builds the CU queue layout from the collected table. Tries the
    /// dedicated per-CU layout first; falls back to one shared queue when
    /// the remaining region cannot fit it or the host asked for shared mode
    /// outright.
    fn handle_cfg_end(
        &mut self,
        io: &mut dyn IoAccessor,
        intr: &mut dyn InterruptLine,
        hdr: &SqHdr,
    ) -> CqEntry {
        let cfgs: Vec<CfgCuPayload> = match &self.state {
            State::Configuring { pending } => {
                if pending.iter().any(|slot| slot.is_none()) {
                    tracing::warn!(
                        missing = pending.iter().filter(|slot| slot.is_none()).count(),
                        "CFG_END before every CU was registered"
                    );
                    return reply(hdr, proto::XGQ_RCODE_INVALID_ARGUMENT);
                }
                pending.iter().map(|slot| slot.unwrap_or_default()).collect()
            }
            _ => return reply(hdr, proto::XGQ_RCODE_INVALID_ARGUMENT),
        };

        let rcode = match self.build_layout(io, &cfgs) {
            Ok(()) => {
                self.cus = cfgs
                    .iter()
                    .map(|cfg| CuDispatcher::new(cfg.cu_addr(), cfg.ctrl_flavor))
                    .collect();
                if self.features.contains(Features::INTR_ON_COMPLETION) {
                    intr.enable();
                }
                self.state = State::Ready;
                tracing::info!(
                    num_cus = self.cus.len(),
                    shared = self.cu_queues.len() == 1 && self.cus.len() > 1,
                    "configuration complete"
                );
                proto::XGQ_RCODE_OK
            }
            // The host can retry with a fresh CFG_START; the scheduler
            // stays alive either way.
            Err(XgqError::TooSmall { .. }) => proto::XGQ_RCODE_TOO_SMALL,
            Err(_) => proto::XGQ_RCODE_INVALID_ARGUMENT,
        };
        reply(hdr, rcode)
    }

    fn build_layout(&mut self, io: &mut dyn IoAccessor, cfgs: &[CfgCuPayload]) -> Result<()> {
        let avail_base = self.cfg.region_base + self.cfg.ctrl_region_len;
        let avail_len = self.cfg.region_len - self.cfg.ctrl_region_len;
        let opts = QueueOptions {
            needs_double_read: self.cfg.needs_double_read,
            ..QueueOptions::default()
        };
        self.cu_queues.clear();
        self.cu_offsets.clear();

        if !self.features.contains(Features::SHARED_QUEUE) {
            match self.build_dedicated(io, cfgs, avail_base, avail_len, opts) {
                Ok(()) => return Ok(()),
                // Not enough room per CU; fall through to the shared layout.
                Err(XgqError::TooSmall { .. }) => {
                    self.cu_queues.clear();
                    self.cu_offsets.clear();
                }
                Err(err) => return Err(err),
            }
        }

        let slot_size = cfgs.iter().map(|cfg| cfg.slot_size).max().unwrap_or(0);
        let queue = XgqQueue::allocate(io, avail_base, avail_len, slot_size, Role::Server, opts)?;
        self.cu_queues.push(CuQueue::new(queue, Binding::Shared));
        let offset = self.cfg.ctrl_region_len as u32;
        self.cu_offsets = cfgs.iter().map(|_| (offset, 1)).collect();
        Ok(())
    }

    fn build_dedicated(
        &mut self,
        io: &mut dyn IoAccessor,
        cfgs: &[CfgCuPayload],
        avail_base: u64,
        avail_len: u64,
        opts: QueueOptions,
    ) -> Result<()> {
        let per_len = (avail_len / cfgs.len() as u64) & !3;
        for (idx, cfg) in cfgs.iter().enumerate() {
            let base = avail_base + idx as u64 * per_len;
            let queue = XgqQueue::allocate(io, base, per_len, cfg.slot_size, Role::Server, opts)?;
            self.cu_queues
                .push(CuQueue::new(queue, Binding::Dedicated(idx as u16)));
            self.cu_offsets
                .push(((base - self.cfg.region_base) as u32, 0));
        }
        Ok(())
    }

    /// Latency self-test: times repeated accesses to the command's own slot
    /// and to CU 0's control register, reporting average cycles per access.
    fn handle_access_valid(
        &mut self,
        io: &mut dyn IoAccessor,
        clock: &mut dyn CycleCounter,
        hdr: &SqHdr,
        slot_addr: u64,
    ) -> CqEntry {
        let scratch = slot_addr + proto::XGQ_SQ_HDR_SIZE as u64;

        let start = clock.cycles();
        for _ in 0..ACCESS_ITERS {
            let word = io.read32(scratch);
            io.write32(scratch, word);
        }
        let slot_avg = clock.cycles().wrapping_sub(start) / (2 * ACCESS_ITERS);

        let cu_avg = match self.cus.first() {
            Some(cu) => {
                let addr = cu.ctrl_addr();
                let start = clock.cycles();
                for _ in 0..ACCESS_ITERS {
                    io.read32(addr);
                }
                clock.cycles().wrapping_sub(start) / ACCESS_ITERS
            }
            None => 0,
        };

        reply_data(hdr, proto::XGQ_RCODE_OK, [slot_avg as u32, cu_avg as u32])
    }

    /// Shared-region self-test. The rcode is always OK; the four pass/fail
    /// bits in `data[0]` carry the verdicts.
    fn handle_data_integrity(
        &mut self,
        io: &mut dyn IoAccessor,
        hdr: &SqHdr,
        slot_addr: u64,
    ) -> CqEntry {
        let mut verdict = 0u32;
        let slot_size = self.ctrl.sq_slot_size() as u64;
        let payload_addr = slot_addr + proto::XGQ_SQ_HDR_SIZE as u64;

        // Unused slot bytes past the payload must still hold the host's fill
        // pattern.
        let used = (proto::XGQ_SQ_HDR_SIZE + hdr.count as u32 + 3) as u64 & !3;
        let mut filled = true;
        let mut addr = slot_addr + used;
        while addr + 4 <= slot_addr + slot_size {
            if io.read32(addr) != proto::INTEGRITY_FILL_PATTERN {
                filled = false;
                break;
            }
            addr += 4;
        }
        if filled {
            verdict |= proto::INTEGRITY_SLOT_PATTERN;
        }

        // Host-to-device: the first payload word carries the round-trip
        // pattern the host wrote.
        if hdr.count >= 4 && io.read32(payload_addr) == proto::INTEGRITY_H2D_PATTERN {
            verdict |= proto::INTEGRITY_H2D_ACCESS;
        }

        // Device-to-host: write the inverted pattern into the slot's last
        // word and read it back through the same accessor.
        let back = slot_addr + slot_size - 4;
        io.write32(back, !proto::INTEGRITY_H2D_PATTERN);
        if io.read32(back) == !proto::INTEGRITY_H2D_PATTERN {
            verdict |= proto::INTEGRITY_D2H_ACCESS;
        }

        // Every configured CU must be sitting idle.
        if self
            .cus
            .iter()
            .all(|cu| io.read32(cu.ctrl_addr()) == ApCtrl::IDLE.bits())
        {
            verdict |= proto::INTEGRITY_CU_IDLE;
        }

        reply_data(hdr, proto::XGQ_RCODE_OK, [verdict, 0])
    }
}

fn reply(hdr: &SqHdr, rcode: u32) -> CqEntry {
    reply_data(hdr, rcode, [0, 0])
}

fn reply_data(hdr: &SqHdr, rcode: u32, data: [u32; 2]) -> CqEntry {
    CqEntry {
        rcode,
        cid: hdr.cid,
        opcode: hdr.opcode,
        data,
    }
}
