//! Host-side helpers: the user-space driver's view of an attached queue.
//!
//! Thin sugar over [`XgqQueue::try_produce`]/[`XgqQueue::try_consume`] for
//! the common submit-one/reap-one pattern; callers that batch several fills
//! under one notify use the queue API directly.

use xgq_protocol::{CqEntry, SqHdr};

use crate::error::{Result, XgqError};
use crate::io::{read_words, write_words, IoAccessor};
use crate::queue::{Role, XgqQueue};

/// Fills the next submission slot with `hdr` plus `payload` words and
/// publishes it. The header's `count` field is derived from the payload.
pub fn submit(
    io: &mut dyn IoAccessor,
    queue: &mut XgqQueue,
    hdr: SqHdr,
    payload: &[u32],
) -> Result<()> {
    if queue.role() != Role::Client {
        return Err(XgqError::InvalidArgument(
            "submit is a client-role operation",
        ));
    }
    let payload_bytes = payload.len() * 4;
    if payload_bytes > queue.sq_payload_capacity() as usize {
        return Err(XgqError::InvalidArgument(
            "argument payload exceeds slot capacity",
        ));
    }
    // Slots may be larger than the 16-bit count field can describe.
    let count = u16::try_from(payload_bytes).map_err(|_| {
        XgqError::InvalidArgument("argument payload exceeds the wire count field")
    })?;
    let hdr = SqHdr { count, ..hdr };

    let slot = queue.try_produce(io)?;
    write_words(io, slot, &hdr.to_words());
    write_words(io, slot + u64::from(xgq_protocol::XGQ_SQ_HDR_SIZE), payload);
    queue.notify_produced(io);
    Ok(())
}

/// Claims, decodes and releases the oldest completion entry.
/// [`XgqError::Empty`] simply means "poll again".
pub fn reap(io: &mut dyn IoAccessor, queue: &mut XgqQueue) -> Result<CqEntry> {
    if queue.role() != Role::Client {
        return Err(XgqError::InvalidArgument("reap is a client-role operation"));
    }
    let slot = queue.try_consume(io)?;
    let mut words = [0u32; 4];
    read_words(io, slot, &mut words);
    queue.notify_consumed(io);
    Ok(CqEntry::from_words(words))
}
