//! Live audio/video relay
//!
//! One publisher pushes a stream under a channel name; any number of
//! subscribers attach at the latest keyframe and read it back at their own
//! pace, optionally through a real-time video transcode stage.
//!
//! ```text
//!  publisher ─► Transcoder ─► Pipeline ─► Queue ◄── Cursor ─► Pipeline ─► subscriber
//!                                           ▲
//!                               ChannelRegistry (name → Channel)
//! ```
//!
//! - [`registry`]: name → channel map, one publisher per name
//! - [`queue`]: per-channel broadcast log with independent cursors
//! - [`transcode`]: decode/convert/encode bridge behind a codec policy
//! - [`pipeline`]: header-then-packets copy between any source and sink
//! - [`media`]: FLV demuxer and muxer
//! - [`server`]: [`Relay`] and the HTTP-FLV surface

pub mod av;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod server;
pub mod transcode;

pub use av::{CodecSet, Packet, Sink, Source, StreamInfo};
pub use error::{Error, MediaError, Result};
pub use queue::{Cursor, Queue, QueueConfig};
pub use registry::{Channel, ChannelRegistry, RegistryError};
pub use server::{HttpServer, Relay, RelayConfig};
pub use transcode::{CodecPolicy, CodecRegistry, TranscodeOptions, Transcoder};
