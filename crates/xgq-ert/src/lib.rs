//! Embedded runtime scheduler for an FPGA accelerator card.
//!
//! Sits on the device side of a set of [`xgq`] rings in a shared BRAM/DDR
//! region: one control queue for the configuration handshake and
//! diagnostics, plus per-epoch CU queues carrying kernel-start commands to
//! HLS compute units over their AXI-lite AP-control registers.
//!
//! The whole runtime is a single cooperative loop ([`Scheduler::run`]); no
//! threads, no interrupt-driven reentrancy. Hardware collaborators the
//! runtime does not own, the cycle counter and the host interrupt line, are
//! injected behind the [`CycleCounter`] and [`InterruptLine`] traits.

#![forbid(unsafe_code)]

pub mod ctrl;
pub mod cu;
pub mod cu_queue;
pub mod scheduler;

pub use ctrl::{ControlCommand, Features};
pub use cu::{ApCtrl, CuDispatcher};
pub use cu_queue::{Binding, CuQueue, Progress};
pub use scheduler::{Phase, Scheduler, SchedulerConfig, MAX_CUS};

/// Free-running hardware cycle counter, snapshotted by `CLOCK_CALIB` and
/// used to time `ACCESS_VALID` register accesses.
pub trait CycleCounter {
    fn cycles(&mut self) -> u64;
}

/// Host-facing interrupt line. `enable` arms it once at configuration time;
/// `signal` raises one CU's bit on completion or error, per the negotiated
/// feature bits.
pub trait InterruptLine {
    fn enable(&mut self);
    fn signal(&mut self, bit: u32);
}
