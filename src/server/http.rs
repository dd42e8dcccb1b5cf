//! HTTP-FLV surface
//!
//! Routes:
//! - `GET /<channel>`: live FLV from the channel's latest keyframe
//! - `POST /<channel>`: publish an FLV request body under the channel
//! - `GET /file`: the configured local FLV file, run through the
//!   transcode bridge (only routed when a file source is configured)
//!
//! Egress runs the muxer in its own task, writing into a bounded in-memory
//! pipe whose read half is the response body. A slow client fills the pipe,
//! which stalls the muxer, which lets the cursor lag until retention
//! force-advances it.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::TryStreamExt;
use tokio::io::{BufReader, DuplexStream};
use tokio::net::TcpListener;
use tokio_util::io::{ReaderStream, StreamReader};
use tower_http::trace::TraceLayer;

use crate::av::Source;
use crate::error::{Error, Result};
use crate::media::{FlvDemuxer, FlvMuxer};
use crate::pipeline;
use crate::registry::RegistryError;
use crate::server::config::{HttpConfig, RelayConfig};
use crate::server::relay::Relay;

pub const FLV_CONTENT_TYPE: &str = "video/x-flv";

/// Buffer between a muxer task and its response body
const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Clone)]
struct HttpState {
    relay: Arc<Relay>,
    file_source: Option<Arc<PathBuf>>,
}

/// Build the router over a relay
pub fn router(relay: Arc<Relay>, config: &HttpConfig) -> Router {
    let state = HttpState {
        relay,
        file_source: config.file_source.clone().map(Arc::new),
    };

    let mut router = Router::new();
    if state.file_source.is_some() {
        router = router.route("/file", get(serve_file));
    }

    router
        .route("/*channel", get(play).post(publish))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP server
pub struct HttpServer {
    config: HttpConfig,
    relay: Arc<Relay>,
}

impl HttpServer {
    /// Create a server and its relay from configuration
    pub fn new(config: &RelayConfig) -> Self {
        Self::with_relay(config.http.clone(), Arc::new(Relay::new(config)))
    }

    /// Create a server over an existing relay
    pub fn with_relay(config: HttpConfig, relay: Arc<Relay>) -> Self {
        Self { config, relay }
    }

    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    pub fn router(&self) -> Router {
        router(Arc::clone(&self.relay), &self.config)
    }

    /// Run the server
    ///
    /// This method blocks until the listener fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(
            addr = %self.config.bind_addr,
            file_source = ?self.config.file_source,
            "HTTP-FLV server listening"
        );

        axum::serve(listener, self.router().into_make_service())
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        Ok(())
    }
}

async fn play(State(state): State<HttpState>, Path(channel): Path<String>) -> Response {
    let mut cursor = match state.relay.subscribe(&channel).await {
        Ok(cursor) => cursor,
        Err(e) => return status_for(&e).into_response(),
    };

    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    tokio::spawn(async move {
        let result = pipeline::copy(&mut cursor, FlvMuxer::new(writer)).await;
        log_egress(&channel, result);
    });

    flv_response(reader)
}

async fn publish(
    State(state): State<HttpState>,
    Path(channel): Path<String>,
    body: Body,
) -> StatusCode {
    let stream = body
        .into_data_stream()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
    let demuxer = FlvDemuxer::new(StreamReader::new(stream));

    match state.relay.publish(&channel, demuxer).await {
        Ok(_) => StatusCode::OK,
        Err(e) => status_for(&e),
    }
}

async fn serve_file(State(state): State<HttpState>) -> Response {
    let Some(path) = state.file_source else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let file = match tokio::fs::File::open(path.as_ref()).await {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cannot open file source");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let mut source = state
        .relay
        .transcoder(FlvDemuxer::new(BufReader::new(file)));
    // Negotiate before answering so a codec failure still gets a status
    if let Err(e) = source.streams().await {
        tracing::warn!(path = %path.display(), error = %e, "File source rejected");
        return status_for(&e).into_response();
    }

    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    tokio::spawn(async move {
        let result = pipeline::copy(&mut source, FlvMuxer::new(writer)).await;
        log_egress("file", result);
    });

    flv_response(reader)
}

fn flv_response(reader: DuplexStream) -> Response {
    (
        [
            (header::CONTENT_TYPE, FLV_CONTENT_TYPE),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response()
}

fn log_egress(channel: &str, result: Result<u64>) {
    match result {
        Ok(packets) => tracing::debug!(channel = %channel, packets = packets, "Egress finished"),
        Err(Error::DownstreamIo(e)) => {
            tracing::debug!(channel = %channel, error = %e, "Subscriber disconnected")
        }
        Err(e) => tracing::warn!(channel = %channel, error = %e, "Egress failed"),
    }
}

/// Response status for a failed operation
fn status_for(e: &Error) -> StatusCode {
    match e {
        Error::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
        Error::Registry(RegistryError::AlreadyPublishing(_)) => StatusCode::CONFLICT,
        Error::CodecUnsupported(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        Error::Media(_) | Error::UpstreamIo(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::to_bytes;
    use axum::http::Request;
    use bytes::Bytes;
    use futures_util::stream;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use super::*;
    use crate::av::{
        AudioCodecType, AudioParams, CodecSet, Packet, Rational, Sink, StreamInfo,
        VideoCodecType, VideoParams,
    };
    use crate::transcode::TranscodeOptions;

    fn av_streams() -> CodecSet {
        CodecSet::new(vec![
            StreamInfo::Video(VideoParams::new(
                VideoCodecType::H264,
                640,
                360,
                Rational::new(30, 1),
            )),
            StreamInfo::Audio(AudioParams::new(AudioCodecType::Mp3, 44100, 2)),
        ])
    }

    fn packets() -> Vec<Packet> {
        vec![
            Packet::new(0, Duration::ZERO, true, Bytes::from_static(b"key")),
            Packet::new(1, Duration::from_millis(26), false, Bytes::from_static(b"mp3")),
            Packet::new(0, Duration::from_millis(33), false, Bytes::from_static(b"inter")),
        ]
    }

    async fn flv_file() -> Vec<u8> {
        let mut muxer = FlvMuxer::new(Vec::new());
        muxer.write_header(&av_streams()).await.unwrap();
        for packet in packets() {
            muxer.write_packet(&packet).await.unwrap();
        }
        muxer.into_inner()
    }

    /// Request body fed chunk by chunk from the test
    fn streaming_body() -> (mpsc::UnboundedSender<Bytes>, Body) {
        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
        let chunks = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok::<_, io::Error>(chunk), rx))
        });
        (tx, Body::from_stream(chunks))
    }

    fn request(method: &str, uri: &str, body: Body) -> Request<Body> {
        Request::builder().method(method).uri(uri).body(body).unwrap()
    }

    fn app(config: &RelayConfig) -> (Arc<Relay>, Router) {
        let relay = Arc::new(Relay::new(config));
        let router = router(Arc::clone(&relay), &config.http);
        (relay, router)
    }

    #[tokio::test]
    async fn test_unknown_channel_404() {
        let (_relay, app) = app(&RelayConfig::default());

        let response = app
            .oneshot(request("GET", "/unknownchannel", Body::empty()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_publish_then_play() {
        let (relay, app) = app(&RelayConfig::default());
        let (tx, body) = streaming_body();

        let upload = tokio::spawn(app.clone().oneshot(request("POST", "/movie", body)));
        while !relay.registry().is_live("movie").await {
            tokio::task::yield_now().await;
        }

        let response = app
            .oneshot(request("GET", "/movie", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], FLV_CONTENT_TYPE);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        tx.send(Bytes::from(flv_file().await)).unwrap();
        drop(tx);

        assert_eq!(upload.await.unwrap().unwrap().status(), StatusCode::OK);

        let flv = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let mut demuxer = FlvDemuxer::new(&flv[..]);
        let streams = demuxer.streams().await.unwrap();
        assert_eq!(streams.len(), 2);

        let mut received = Vec::new();
        while let Some(packet) = demuxer.read_packet().await.unwrap() {
            received.push(packet);
        }
        assert_eq!(received, packets());
    }

    #[tokio::test]
    async fn test_publish_conflict() {
        let (relay, app) = app(&RelayConfig::default());
        let (tx, body) = streaming_body();

        let upload = tokio::spawn(app.clone().oneshot(request("POST", "/movie", body)));
        while !relay.registry().is_live("movie").await {
            tokio::task::yield_now().await;
        }

        let response = app
            .oneshot(request("POST", "/movie", Body::from(flv_file().await)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        drop(tx);
        // An empty upload has no FLV header
        assert_eq!(upload.await.unwrap().unwrap().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_publish_malformed() {
        let (relay, app) = app(&RelayConfig::default());

        let response = app
            .oneshot(request("POST", "/movie", Body::from("not an flv file")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!relay.registry().is_live("movie").await);
    }

    #[tokio::test]
    async fn test_publish_unsupported_codec() {
        // No VP6 encoder is available
        let config =
            RelayConfig::default().transcode(TranscodeOptions::new().codec(VideoCodecType::Vp6));
        let (_relay, app) = app(&config);

        let response = app
            .oneshot(request("POST", "/movie", Body::from(flv_file().await)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_file_route() {
        let path = std::env::temp_dir().join(format!("avrelay-http-{}.flv", std::process::id()));
        tokio::fs::write(&path, flv_file().await).await.unwrap();

        let (_relay, app) = app(&RelayConfig::default().file_source(&path));
        let response = app
            .oneshot(request("GET", "/file", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let flv = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let mut demuxer = FlvDemuxer::new(&flv[..]);
        demuxer.streams().await.unwrap();
        let mut count = 0;
        while demuxer.read_packet().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, packets().len());

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_route_absent_without_source() {
        let (_relay, app) = app(&RelayConfig::default());

        // Falls through to the channel route; no channel is named "file"
        let response = app
            .oneshot(request("GET", "/file", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
