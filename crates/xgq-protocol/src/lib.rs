#![no_std]
#![forbid(unsafe_code)]

//! XGQ wire format: the shared-memory layout both peers (host driver and
//! embedded scheduler firmware) must agree on, byte for byte.
//!
//! This crate is layout and constants only. It performs no I/O and never
//! allocates; the transport lives in the `xgq` crate.

/// Magic sentinel stored in the first header word (little-endian ASCII `XGQ?`).
///
/// The allocator writes `0` there first and stores the sentinel only after the
/// rest of the header is durable, so a peer that observes the sentinel is
/// guaranteed a fully initialized header.
pub const XGQ_MAGIC: u32 = 0x5847_513F;

pub const XGQ_MAJOR: u16 = 1;
pub const XGQ_MINOR: u16 = 0;

/// Minimum slot count per ring. Slot counts are always powers of two.
pub const XGQ_MIN_SLOTS: u32 = 2;

/// Completion-queue slot size is fixed by protocol major version 1.
pub const XGQ_CQ_SLOT_SIZE: u32 = 16;

/// Submission command header size in bytes; argument payload follows it.
pub const XGQ_SQ_HDR_SIZE: u32 = 8;

pub const fn xgq_version(major: u16, minor: u16) -> u32 {
  (major as u32) << 16 | minor as u32
}

pub const fn xgq_version_major(version: u32) -> u16 {
  (version >> 16) as u16
}

pub const fn xgq_version_minor(version: u32) -> u16 {
  (version & 0xffff) as u16
}

// Header flags word.
pub const XGQ_FLAG_NEEDS_DOUBLE_READ: u32 = 1 << 0;
pub const XGQ_FLAG_IN_MEM_PRODUCED: u32 = 1 << 1;

/// Ring-region header (`struct xgq_header`): eleven consecutive u32 words at
/// the base of the shared region. Field order is load-bearing.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct XgqHeader {
  pub magic: u32,
  pub version: u32,
  pub slot_count: u32,
  pub sq_offset: u32,
  pub sq_slot_size: u32,
  pub cq_offset: u32,
  pub sq_consumed: u32,
  pub cq_consumed: u32,
  pub flags: u32,
  pub sq_produced: u32,
  pub cq_produced: u32,
}

/// Header size in bytes. Rings start at the offsets the header records, so
/// peers never recompute this.
pub const XGQ_HEADER_SIZE: u32 = 44;

// Word indices into the header, for peers that update a single field in
// place (cursor publication) rather than rewriting the whole header.
pub const XGQ_HDR_MAGIC: u32 = 0;
pub const XGQ_HDR_VERSION: u32 = 1;
pub const XGQ_HDR_SLOT_COUNT: u32 = 2;
pub const XGQ_HDR_SQ_OFFSET: u32 = 3;
pub const XGQ_HDR_SQ_SLOT_SIZE: u32 = 4;
pub const XGQ_HDR_CQ_OFFSET: u32 = 5;
pub const XGQ_HDR_SQ_CONSUMED: u32 = 6;
pub const XGQ_HDR_CQ_CONSUMED: u32 = 7;
pub const XGQ_HDR_FLAGS: u32 = 8;
pub const XGQ_HDR_SQ_PRODUCED: u32 = 9;
pub const XGQ_HDR_CQ_PRODUCED: u32 = 10;

impl XgqHeader {
  pub fn to_words(self) -> [u32; 11] {
    [
      self.magic,
      self.version,
      self.slot_count,
      self.sq_offset,
      self.sq_slot_size,
      self.cq_offset,
      self.sq_consumed,
      self.cq_consumed,
      self.flags,
      self.sq_produced,
      self.cq_produced,
    ]
  }

  pub fn from_words(words: [u32; 11]) -> XgqHeader {
    XgqHeader {
      magic: words[0],
      version: words[1],
      slot_count: words[2],
      sq_offset: words[3],
      sq_slot_size: words[4],
      cq_offset: words[5],
      sq_consumed: words[6],
      cq_consumed: words[7],
      flags: words[8],
      sq_produced: words[9],
      cq_produced: words[10],
    }
  }
}

// Opcodes. The CU-queue number space (< 0x100) currently holds a single
// recognized opcode; the control plane lives at 0x100 and up.
pub const XGQ_OP_START_CUIDX: u16 = 0x0001;

pub const XGQ_OP_CFG_START: u16 = 0x0101;
pub const XGQ_OP_CFG_CU: u16 = 0x0102;
pub const XGQ_OP_CFG_END: u16 = 0x0103;
pub const XGQ_OP_QUERY_CU: u16 = 0x0104;
pub const XGQ_OP_CLOCK_CALIB: u16 = 0x0105;
pub const XGQ_OP_ACCESS_VALID: u16 = 0x0106;
pub const XGQ_OP_DATA_INTEGRITY: u16 = 0x0107;
pub const XGQ_OP_EXIT: u16 = 0x0108;
pub const XGQ_OP_IDENTIFY: u16 = 0x0109;

// Completion `rcode` values. `0` is success; everything else is reported back
// to the submitter in the completion entry, never silently dropped.
pub const XGQ_RCODE_OK: u32 = 0;
pub const XGQ_RCODE_INVALID_ARGUMENT: u32 = 1;
pub const XGQ_RCODE_NO_SPACE: u32 = 2;
pub const XGQ_RCODE_NOT_SUPPORTED: u32 = 3;
pub const XGQ_RCODE_TOO_SMALL: u32 = 4;

// CFG_START feature bitmask.
pub const XGQ_FEAT_INTR_ON_COMPLETION: u32 = 1 << 0;
pub const XGQ_FEAT_INTR_ON_ERROR: u32 = 1 << 1;
pub const XGQ_FEAT_ECHO_MODE: u32 = 1 << 2;
pub const XGQ_FEAT_SHARED_QUEUE: u32 = 1 << 3;
pub const XGQ_FEAT_SCRATCH_MODE: u32 = 1 << 4;
pub const XGQ_FEAT_DEBUG_MSG: u32 = 1 << 5;

// AP-control register bits (HLS AXI-lite convention).
pub const AP_START: u32 = 1 << 0;
pub const AP_DONE: u32 = 1 << 1;
pub const AP_IDLE: u32 = 1 << 2;
pub const AP_READY: u32 = 1 << 3;
pub const AP_CONTINUE: u32 = 1 << 4;

/// Byte offset of the argument region from a CU's control-register base.
/// Words 0..4 are control/interrupt registers per the HLS convention.
pub const CU_ARG_OFFSET: u64 = 0x10;

/// Submission-slot command header (`struct xgq_sq_hdr`): two u32 words.
///
/// `count` is the argument payload length in bytes (must be a multiple of 4);
/// payload words follow the header inside the same slot. `cu_idx` routes a
/// `START_CUIDX` command in shared-queue mode and is zero otherwise.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SqHdr {
  pub opcode: u16,
  pub count: u16,
  pub cid: u16,
  pub cu_idx: u16,
}

impl SqHdr {
  pub fn to_words(self) -> [u32; 2] {
    [
      (self.count as u32) << 16 | self.opcode as u32,
      (self.cu_idx as u32) << 16 | self.cid as u32,
    ]
  }

  pub fn from_words(words: [u32; 2]) -> SqHdr {
    SqHdr {
      opcode: (words[0] & 0xffff) as u16,
      count: (words[0] >> 16) as u16,
      cid: (words[1] & 0xffff) as u16,
      cu_idx: (words[1] >> 16) as u16,
    }
  }
}

/// Completion-queue entry (`struct xgq_cq_entry`): four u32 words, fixed size.
///
/// `data` carries the per-opcode response: `CLOCK_CALIB` packs a 64-bit cycle
/// snapshot (lo, hi), `IDENTIFY` packs major/minor, `QUERY_CU` packs queue
/// offset and type, `DATA_INTEGRITY` packs four pass/fail bits in `data[0]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CqEntry {
  pub rcode: u32,
  pub cid: u16,
  pub opcode: u16,
  pub data: [u32; 2],
}

impl CqEntry {
  pub fn to_words(self) -> [u32; 4] {
    [
      self.rcode,
      (self.opcode as u32) << 16 | self.cid as u32,
      self.data[0],
      self.data[1],
    ]
  }

  pub fn from_words(words: [u32; 4]) -> CqEntry {
    CqEntry {
      rcode: words[0],
      cid: (words[1] & 0xffff) as u16,
      opcode: (words[1] >> 16) as u16,
      data: [words[2], words[3]],
    }
  }
}

// DATA_INTEGRITY pass/fail bits in `CqEntry::data[0]`.
pub const INTEGRITY_SLOT_PATTERN: u32 = 1 << 0;
pub const INTEGRITY_H2D_ACCESS: u32 = 1 << 1;
pub const INTEGRITY_D2H_ACCESS: u32 = 1 << 2;
pub const INTEGRITY_CU_IDLE: u32 = 1 << 3;

/// Fill pattern the host writes over unused control-slot bytes; scanned by
/// the `DATA_INTEGRITY` self-test.
pub const INTEGRITY_FILL_PATTERN: u32 = 0xdead_beef;

/// Host→device round-trip pattern for the `DATA_INTEGRITY` self-test.
pub const INTEGRITY_H2D_PATTERN: u32 = 0xa55a_a55a;

/// `CFG_START` payload: requested CU count and negotiated feature bitmask.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CfgStartPayload {
  pub num_cus: u32,
  pub features: u32,
}

impl CfgStartPayload {
  pub fn to_words(self) -> [u32; 2] {
    [self.num_cus, self.features]
  }

  pub fn from_words(words: [u32; 2]) -> CfgStartPayload {
    CfgStartPayload {
      num_cus: words[0],
      features: words[1],
    }
  }
}

// AP-control flavors a CU can be registered with.
pub const CU_CTRL_HS: u32 = 0;
pub const CU_CTRL_CHAIN: u32 = 1;

/// `CFG_CU` payload: one CU's control-register address, AP-control flavor and
/// command slot size, indexed by `cu_idx` in the command header.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CfgCuPayload {
  pub cu_addr_lo: u32,
  pub cu_addr_hi: u32,
  pub ctrl_flavor: u32,
  pub slot_size: u32,
}

impl CfgCuPayload {
  pub fn cu_addr(&self) -> u64 {
    (self.cu_addr_hi as u64) << 32 | self.cu_addr_lo as u64
  }

  pub fn to_words(self) -> [u32; 4] {
    [
      self.cu_addr_lo,
      self.cu_addr_hi,
      self.ctrl_flavor,
      self.slot_size,
    ]
  }

  pub fn from_words(words: [u32; 4]) -> CfgCuPayload {
    CfgCuPayload {
      cu_addr_lo: words[0],
      cu_addr_hi: words[1],
      ctrl_flavor: words[2],
      slot_size: words[3],
    }
  }
}

#[cfg(test)]
extern crate std;
