//! Wire layer: message types, format tags, and frame codec.
//!
//! Inspectors receive a one-way stream of frames. Each frame names its
//! method and payload format in a fixed header, followed by the payload.

pub mod codec;
pub mod messages;

pub use codec::{FrameHeader, HEADER_LEN, MAX_PAYLOAD, decode, encode, read_message};
pub use messages::{Method, ProfilerInfo, WireFormat, WireMessage};
