//! # Strobe Core
//!
//! Client-side demultiplexing and stream-property-negotiation core.
//!
//! Consumes raw elementary-stream packets from an external transport demuxer
//! and produces fully-described packets plus per-stream metadata ready for a
//! decoder stage: codec, resolution, sample rate, profile/level, extradata.
//! Stream properties are learned incrementally from packet content and
//! property changes are signalled to the decoder before the packets that
//! carry them.

// ============================================================================
// Data Model
// ============================================================================
pub mod codec;
pub mod packet;
pub mod stream;

// ============================================================================
// Bitstream Parsing
// ============================================================================
pub mod bitstream;
pub mod parser;

// ============================================================================
// Demux Core
// ============================================================================
pub mod demux;
mod negotiate;
pub mod registry;
pub mod transport;

// ============================================================================
// Closed Captions
// ============================================================================
pub mod cc;

#[cfg(test)]
mod testutil;

pub use codec::CodecId;
pub use demux::{ClientDemux, DemuxError};
pub use packet::{DemuxPacket, StreamId};
pub use parser::{NativeParserFactory, ParserFactory};
pub use registry::StreamRegistry;
pub use stream::{StreamDescriptor, StreamKind, StreamProperties};
pub use transport::TransportDemux;

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
