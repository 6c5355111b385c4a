#![allow(dead_code)]

//! Shared harness: a scheduler over a RAM-backed shared region, a host-side
//! control client, and fake clock/interrupt collaborators.

use xgq::host;
use xgq::{IoAccessor, QueueOptions, RamRegion, Role, XgqQueue};
use xgq_ert::{CycleCounter, InterruptLine, Scheduler, SchedulerConfig};
use xgq_protocol as proto;
use xgq_protocol::{CfgCuPayload, CfgStartPayload, CqEntry, SqHdr};

pub const REGION_BASE: u64 = 0x1_0000;
pub const REGION_LEN: u64 = 0x8000;
pub const CTRL_LEN: u64 = 0x1000;
pub const CTRL_SLOT: u32 = 64;

pub const CU0_ADDR: u64 = 0x8_0000;
pub const CU1_ADDR: u64 = 0x8_1000;

/// Deterministic cycle counter: advances by a fixed step on every snapshot.
pub struct TestClock {
    now: u64,
    step: u64,
}

impl TestClock {
    pub fn new() -> TestClock {
        TestClock::with_step(1)
    }

    pub fn with_step(step: u64) -> TestClock {
        TestClock { now: 0, step }
    }
}

impl CycleCounter for TestClock {
    fn cycles(&mut self) -> u64 {
        self.now += self.step;
        self.now
    }
}

/// Records every interrupt interaction for assertions.
#[derive(Default)]
pub struct TestIntr {
    pub enabled: bool,
    pub signals: Vec<u32>,
}

impl InterruptLine for TestIntr {
    fn enable(&mut self) {
        self.enabled = true;
    }

    fn signal(&mut self, bit: u32) {
        self.signals.push(bit);
    }
}

pub struct Harness {
    pub io: RamRegion,
    pub sched: Scheduler,
    pub ctrl: XgqQueue,
    pub clock: TestClock,
    pub intr: TestIntr,
    next_cid: u16,
}

impl Harness {
    pub fn new() -> Harness {
        Harness::with_clock(TestClock::new())
    }

    pub fn with_clock(clock: TestClock) -> Harness {
        let mut io = RamRegion::new(0, 0x10_0000);
        let sched = Scheduler::new(
            &mut io,
            SchedulerConfig {
                region_base: REGION_BASE,
                region_len: REGION_LEN,
                ctrl_region_len: CTRL_LEN,
                ctrl_slot_size: CTRL_SLOT,
                needs_double_read: false,
            },
        )
        .unwrap();
        let ctrl =
            XgqQueue::attach(&mut io, REGION_BASE, Role::Client, QueueOptions::default()).unwrap();
        io.write32(CU0_ADDR, proto::AP_IDLE);
        io.write32(CU1_ADDR, proto::AP_IDLE);
        Harness {
            io,
            sched,
            ctrl,
            clock,
            intr: TestIntr::default(),
            next_cid: 1,
        }
    }

    pub fn step(&mut self) {
        self.sched
            .run_once(&mut self.io, &mut self.clock, &mut self.intr);
    }

    pub fn send_ctrl(&mut self, opcode: u16, cu_idx: u16, payload: &[u32]) -> u16 {
        let cid = self.next_cid;
        self.next_cid += 1;
        let hdr = SqHdr {
            opcode,
            count: 0, // derived from the payload by submit
            cid,
            cu_idx,
        };
        host::submit(&mut self.io, &mut self.ctrl, hdr, payload).unwrap();
        cid
    }

    pub fn reap_ctrl(&mut self) -> CqEntry {
        host::reap(&mut self.io, &mut self.ctrl).unwrap()
    }

    /// Submit, run one scheduler iteration, reap the single completion.
    pub fn roundtrip(&mut self, opcode: u16, cu_idx: u16, payload: &[u32]) -> CqEntry {
        let cid = self.send_ctrl(opcode, cu_idx, payload);
        self.step();
        let entry = self.reap_ctrl();
        assert_eq!(entry.cid, cid);
        assert_eq!(entry.opcode, opcode);
        entry
    }

    /// Drives a full configuration epoch and asserts every step succeeded.
    pub fn configure(&mut self, cus: &[(u64, u32)], features: u32) {
        let start = CfgStartPayload {
            num_cus: cus.len() as u32,
            features,
        };
        let entry = self.roundtrip(proto::XGQ_OP_CFG_START, 0, &start.to_words());
        assert_eq!(entry.rcode, proto::XGQ_RCODE_OK);
        for (idx, &(addr, slot_size)) in cus.iter().enumerate() {
            let entry = self.roundtrip(
                proto::XGQ_OP_CFG_CU,
                idx as u16,
                &cu_payload(addr, slot_size).to_words(),
            );
            assert_eq!(entry.rcode, proto::XGQ_RCODE_OK);
        }
        let entry = self.roundtrip(proto::XGQ_OP_CFG_END, 0, &[]);
        assert_eq!(entry.rcode, proto::XGQ_RCODE_OK);
    }

    /// `QUERY_CU` as the host sees it: `(region offset, queue kind)`.
    pub fn query_cu(&mut self, cu_idx: u16) -> (u32, u32) {
        let entry = self.roundtrip(proto::XGQ_OP_QUERY_CU, cu_idx, &[]);
        assert_eq!(entry.rcode, proto::XGQ_RCODE_OK);
        (entry.data[0], entry.data[1])
    }

    pub fn attach_cu_queue(&mut self, cu_idx: u16) -> XgqQueue {
        let (offset, _) = self.query_cu(cu_idx);
        XgqQueue::attach(
            &mut self.io,
            REGION_BASE + offset as u64,
            Role::Client,
            QueueOptions::default(),
        )
        .unwrap()
    }
}

pub fn cu_payload(addr: u64, slot_size: u32) -> CfgCuPayload {
    CfgCuPayload {
        cu_addr_lo: addr as u32,
        cu_addr_hi: (addr >> 32) as u32,
        ctrl_flavor: proto::CU_CTRL_HS,
        slot_size,
    }
}
