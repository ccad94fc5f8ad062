//! Format negotiation
//!
//! Turns the host's requested wave format into a sample spec, channel map
//! and buffer sizing the server will accept.

pub mod negotiate;
pub mod spec;

pub use negotiate::{negotiate, NegotiatedFormat};
pub use spec::{BufferAttr, ChannelMap, ChannelPosition, SampleEncoding, SampleSpec, WaveFormat};
