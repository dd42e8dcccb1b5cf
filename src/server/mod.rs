//! Relay server
//!
//! [`Relay`] owns the channel registry and the transcode settings and exposes
//! `publish`/`play`. [`HttpServer`] puts an HTTP-FLV surface in front of it.

pub mod config;
pub mod http;
pub mod relay;

pub use config::{HttpConfig, RelayConfig};
pub use http::{router, HttpServer, FLV_CONTENT_TYPE};
pub use relay::Relay;
