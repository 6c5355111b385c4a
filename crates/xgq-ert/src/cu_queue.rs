use std::collections::VecDeque;

use xgq::{read_words, write_words, IoAccessor, XgqQueue};
use xgq_protocol as proto;
use xgq_protocol::{CqEntry, SqHdr};

use crate::ctrl::Features;
use crate::cu::CuDispatcher;
use crate::InterruptLine;

/// One submission slot currently owned by the consumer, between the claim
/// and the corresponding consumed-cursor publication. The header is decoded
/// exactly once, at claim time.
#[derive(Clone, Copy, Debug)]
pub struct PendingCommand {
    pub slot_addr: u64,
    pub hdr: SqHdr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    Progressed,
    /// Nothing to do right now: ring empty, CU busy, or completion ring
    /// full. Expected steady-state outcome; the scheduler just revisits.
    NoProgress,
}

/// How a queue maps onto compute units for one configuration epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    /// Mode 1: the queue is dedicated to a single CU.
    Dedicated(u16),
    /// Fallback when ring space cannot fit per-CU queues: one queue serves
    /// every CU. Each command names its target and at most one is in flight
    /// at a time.
    Shared,
}

/// Binds one XGQ to the CU(s) it feeds: at most one cached pending command
/// plus the FIFO of dispatched-but-not-done commands.
#[derive(Debug)]
pub struct CuQueue {
    queue: XgqQueue,
    binding: Binding,
    pending: Option<PendingCommand>,
    inflight: VecDeque<(u16, u16)>, // (cu_idx, cid), dispatch order
}

impl CuQueue {
    pub fn new(queue: XgqQueue, binding: Binding) -> CuQueue {
        CuQueue {
            queue,
            binding,
            pending: None,
            inflight: VecDeque::new(),
        }
    }

    pub fn binding(&self) -> Binding {
        self.binding
    }

    pub fn queue(&self) -> &XgqQueue {
        &self.queue
    }

    /// Commands dispatched to hardware but not yet observed DONE.
    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// One cooperative step. Never blocks: a CU that is not ready or a ring
    /// with nothing to offer simply yields so the scheduler can move on.
    pub fn process(
        &mut self,
        io: &mut dyn IoAccessor,
        cus: &mut [CuDispatcher],
        features: Features,
        intr: &mut dyn InterruptLine,
    ) -> Progress {
        let mut progress = Progress::NoProgress;

        // (1) claim the next command when none is cached.
        if self.pending.is_none() {
            if let Ok(slot_addr) = self.queue.try_consume(io) {
                let mut words = [0u32; 2];
                read_words(io, slot_addr, &mut words);
                self.pending = Some(PendingCommand {
                    slot_addr,
                    hdr: SqHdr::from_words(words),
                });
            }
        }

        // (2) poll the oldest dispatched command. The completion is only
        // taken once there is completion-ring space to report it, so a full
        // ring defers rather than drops.
        if let Some(&(cu_idx, cid)) = self.inflight.front() {
            let cu = &mut cus[cu_idx as usize];
            cu.load_status(io);
            if cu.is_done() {
                if let Ok(cq_slot) = self.queue.try_produce(io) {
                    cu.complete(io);
                    let entry = CqEntry {
                        rcode: proto::XGQ_RCODE_OK,
                        cid,
                        opcode: proto::XGQ_OP_START_CUIDX,
                        data: [0, 0],
                    };
                    write_words(io, cq_slot, &entry.to_words());
                    self.queue.notify_produced(io);
                    if features.contains(Features::INTR_ON_COMPLETION) {
                        intr.signal(cu_idx as u32);
                    }
                    self.inflight.pop_front();
                    progress = Progress::Progressed;
                }
            }
        }

        // (3) dispatch the cached command once its CU accepts input.
        if let Some(cmd) = self.pending {
            if cmd.hdr.opcode != proto::XGQ_OP_START_CUIDX {
                if self.finish_rejected(io, &cmd, proto::XGQ_RCODE_NOT_SUPPORTED, features, intr) {
                    progress = Progress::Progressed;
                }
                return progress;
            }
            if features.contains(Features::ECHO_MODE) {
                // Loopback test mode: complete without touching hardware.
                if self.finish_rejected(io, &cmd, proto::XGQ_RCODE_OK, features, intr) {
                    progress = Progress::Progressed;
                }
                return progress;
            }

            let cu_idx = match self.binding {
                Binding::Dedicated(idx) => idx,
                Binding::Shared => cmd.hdr.cu_idx,
            };
            if cu_idx as usize >= cus.len() {
                if self.finish_rejected(io, &cmd, proto::XGQ_RCODE_INVALID_ARGUMENT, features, intr)
                {
                    progress = Progress::Progressed;
                }
                return progress;
            }
            if cmd.hdr.count % 4 != 0
                || cmd.hdr.count as u32 > self.queue.sq_payload_capacity()
            {
                if self.finish_rejected(io, &cmd, proto::XGQ_RCODE_INVALID_ARGUMENT, features, intr)
                {
                    progress = Progress::Progressed;
                }
                return progress;
            }
            // The shared slot binds to one CU at a time.
            if self.binding == Binding::Shared && !self.inflight.is_empty() {
                return progress;
            }

            let cu = &mut cus[cu_idx as usize];
            if !cu.is_ready() {
                cu.load_status(io);
            }
            if cu.is_ready() {
                let mut args = vec![0u32; cmd.hdr.count as usize / 4];
                read_words(io, cmd.slot_addr + proto::XGQ_SQ_HDR_SIZE as u64, &mut args);
                cu.start(io, &args);
                self.inflight.push_back((cu_idx, cmd.hdr.cid));
                self.queue.notify_consumed(io);
                self.pending = None;
                progress = Progress::Progressed;
            }
        }

        progress
    }

    /// Completes a command without dispatching it (rejection or echo mode).
    /// Returns false when the completion ring is full; the command stays
    /// cached and is retried next iteration.
    fn finish_rejected(
        &mut self,
        io: &mut dyn IoAccessor,
        cmd: &PendingCommand,
        rcode: u32,
        features: Features,
        intr: &mut dyn InterruptLine,
    ) -> bool {
        let cq_slot = match self.queue.try_produce(io) {
            Ok(slot) => slot,
            Err(_) => return false,
        };
        let entry = CqEntry {
            rcode,
            cid: cmd.hdr.cid,
            opcode: cmd.hdr.opcode,
            data: [0, 0],
        };
        write_words(io, cq_slot, &entry.to_words());
        self.queue.notify_produced(io);
        self.queue.notify_consumed(io);
        self.pending = None;
        if rcode != proto::XGQ_RCODE_OK && features.contains(Features::INTR_ON_ERROR) {
            intr.signal(cmd.hdr.cu_idx as u32);
        }
        if rcode == proto::XGQ_RCODE_OK && features.contains(Features::INTR_ON_COMPLETION) {
            intr.signal(cmd.hdr.cu_idx as u32);
        }
        true
    }
}
