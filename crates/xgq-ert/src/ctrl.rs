//! Control-plane command decoding and the negotiated feature set.

use bitflags::bitflags;

use xgq::{read_words, IoAccessor};
use xgq_protocol as proto;
use xgq_protocol::{CfgCuPayload, CfgStartPayload, SqHdr};

bitflags! {
    /// Feature bitmask negotiated by `CFG_START` for one configuration
    /// epoch.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Features: u32 {
        /// Signal the host interrupt line when a CU command completes.
        const INTR_ON_COMPLETION = proto::XGQ_FEAT_INTR_ON_COMPLETION;
        /// Signal the host interrupt line when a CU command fails.
        const INTR_ON_ERROR = proto::XGQ_FEAT_INTR_ON_ERROR;
        /// Loopback test mode: CU commands complete without touching
        /// hardware.
        const ECHO_MODE = proto::XGQ_FEAT_ECHO_MODE;
        /// Force the shared single-queue layout even when a dedicated
        /// per-CU layout would fit.
        const SHARED_QUEUE = proto::XGQ_FEAT_SHARED_QUEUE;
        const SCRATCH_MODE = proto::XGQ_FEAT_SCRATCH_MODE;
        const DEBUG_MSG = proto::XGQ_FEAT_DEBUG_MSG;
    }
}

/// A control-queue command, decoded exactly once from its slot. The slot is
/// never reinterpreted after this point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    CfgStart(CfgStartPayload),
    CfgCu { cu_idx: u16, cfg: CfgCuPayload },
    CfgEnd,
    QueryCu { cu_idx: u16 },
    ClockCalib,
    AccessValid,
    DataIntegrity,
    Identify,
    Exit,
    /// Recognized number space, wrong payload length.
    Malformed(u16),
    /// Unrecognized opcode; completed with `NOT_SUPPORTED`, never dropped.
    Unknown(u16),
}

/// Reads the command header and opcode-specific payload out of a submission
/// slot the caller currently owns.
pub fn decode(io: &mut dyn IoAccessor, slot_addr: u64) -> (SqHdr, ControlCommand) {
    let mut words = [0u32; 2];
    read_words(io, slot_addr, &mut words);
    let hdr = SqHdr::from_words(words);
    let payload_addr = slot_addr + proto::XGQ_SQ_HDR_SIZE as u64;

    let expect = |bytes: u16, cmd: ControlCommand| {
        if hdr.count == bytes {
            cmd
        } else {
            ControlCommand::Malformed(hdr.opcode)
        }
    };

    let cmd = match hdr.opcode {
        proto::XGQ_OP_CFG_START => {
            if hdr.count != 8 {
                ControlCommand::Malformed(hdr.opcode)
            } else {
                let mut payload = [0u32; 2];
                read_words(io, payload_addr, &mut payload);
                ControlCommand::CfgStart(CfgStartPayload::from_words(payload))
            }
        }
        proto::XGQ_OP_CFG_CU => {
            if hdr.count != 16 {
                ControlCommand::Malformed(hdr.opcode)
            } else {
                let mut payload = [0u32; 4];
                read_words(io, payload_addr, &mut payload);
                ControlCommand::CfgCu {
                    cu_idx: hdr.cu_idx,
                    cfg: CfgCuPayload::from_words(payload),
                }
            }
        }
        proto::XGQ_OP_CFG_END => expect(0, ControlCommand::CfgEnd),
        proto::XGQ_OP_QUERY_CU => expect(0, ControlCommand::QueryCu { cu_idx: hdr.cu_idx }),
        proto::XGQ_OP_CLOCK_CALIB => expect(0, ControlCommand::ClockCalib),
        proto::XGQ_OP_ACCESS_VALID => expect(0, ControlCommand::AccessValid),
        // DATA_INTEGRITY carries a variable self-test payload; its handler
        // validates what it needs.
        proto::XGQ_OP_DATA_INTEGRITY => ControlCommand::DataIntegrity,
        proto::XGQ_OP_IDENTIFY => expect(0, ControlCommand::Identify),
        proto::XGQ_OP_EXIT => expect(0, ControlCommand::Exit),
        other => ControlCommand::Unknown(other),
    };
    (hdr, cmd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xgq::{write_words, RamRegion};

    fn encode(hdr: SqHdr, payload: &[u32]) -> RamRegion {
        let mut io = RamRegion::new(0, 256);
        write_words(&mut io, 0, &hdr.to_words());
        write_words(&mut io, proto::XGQ_SQ_HDR_SIZE as u64, payload);
        io
    }

    #[test]
    fn decodes_cfg_start() {
        let hdr = SqHdr {
            opcode: proto::XGQ_OP_CFG_START,
            count: 8,
            cid: 1,
            cu_idx: 0,
        };
        let mut io = encode(hdr, &[3, proto::XGQ_FEAT_INTR_ON_COMPLETION]);
        let (got_hdr, cmd) = decode(&mut io, 0);
        assert_eq!(got_hdr, hdr);
        assert_eq!(
            cmd,
            ControlCommand::CfgStart(CfgStartPayload {
                num_cus: 3,
                features: proto::XGQ_FEAT_INTR_ON_COMPLETION,
            })
        );
    }

    #[test]
    fn decodes_cfg_cu_with_index_from_header() {
        let hdr = SqHdr {
            opcode: proto::XGQ_OP_CFG_CU,
            count: 16,
            cid: 2,
            cu_idx: 5,
        };
        let cfg = CfgCuPayload {
            cu_addr_lo: 0x8000,
            cu_addr_hi: 0,
            ctrl_flavor: proto::CU_CTRL_HS,
            slot_size: 64,
        };
        let mut io = encode(hdr, &cfg.to_words());
        let (_, cmd) = decode(&mut io, 0);
        assert_eq!(cmd, ControlCommand::CfgCu { cu_idx: 5, cfg });
    }

    #[test]
    fn wrong_payload_length_is_malformed_not_misdecoded() {
        let hdr = SqHdr {
            opcode: proto::XGQ_OP_CFG_START,
            count: 4,
            cid: 0,
            cu_idx: 0,
        };
        let mut io = encode(hdr, &[3]);
        let (_, cmd) = decode(&mut io, 0);
        assert_eq!(cmd, ControlCommand::Malformed(proto::XGQ_OP_CFG_START));
    }

    #[test]
    fn unrecognized_opcode_is_unknown() {
        let hdr = SqHdr {
            opcode: 0x7fff,
            count: 0,
            cid: 0,
            cu_idx: 0,
        };
        let mut io = encode(hdr, &[]);
        let (_, cmd) = decode(&mut io, 0);
        assert_eq!(cmd, ControlCommand::Unknown(0x7fff));
    }
}
