//! XGQ transport: a submission/completion ring pair over a shared
//! memory/register region.
//!
//! This crate intentionally stays small and self-contained: the only external
//! input is an [`IoAccessor`] (a mapped BAR, device BRAM, or plain memory)
//! and the only wire knowledge comes from `xgq-protocol`. There are no
//! atomics, locks, or barrier instructions anywhere - the protocol's entire
//! synchronization story is single-writer-per-field cursor discipline plus
//! "payload writes strictly before cursor publication", enforced by call
//! order. Either side of the link runs one role:
//!
//! - `Client` (host driver): produces submissions, consumes completions.
//! - `Server` (scheduler firmware): consumes submissions, produces
//!   completions.
//!
//! Hardware quirks are kept as explicit, named workarounds: the BRAM
//! read-collision erratum lives behind [`IoAccessor::double_read32`] and is
//! opted into per queue via a header flag, never applied by default.

#![forbid(unsafe_code)]

pub mod error;
pub mod host;
pub mod io;
pub mod queue;
pub mod ring;

pub use error::{Result, XgqError};
pub use io::{read_words, write_words, IoAccessor, RamRegion};
pub use queue::{ProducedOverride, QueueFlags, QueueOptions, Role, XgqQueue};
pub use ring::Ring;
