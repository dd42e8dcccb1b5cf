//! FLV container support
//!
//! This module provides:
//! - FLV tag parsing and generation
//! - AMF0 script data and `onMetaData`
//! - H.264/AVC and AAC sequence header parsing
//! - [`FlvDemuxer`] and [`FlvMuxer`], the [`Source`](crate::av::Source) and
//!   [`Sink`](crate::av::Sink) used by the HTTP surface

pub mod aac;
pub mod amf;
pub mod demux;
pub mod flv;
pub mod h264;
pub mod metadata;
pub mod mux;

pub use aac::{AacPacketType, AudioSpecificConfig};
pub use amf::ScriptValue;
pub use demux::FlvDemuxer;
pub use flv::{FlvHeader, FlvTag, FlvTagType};
pub use h264::{AvcConfig, AvcPacketType};
pub use metadata::Metadata;
pub use mux::FlvMuxer;
