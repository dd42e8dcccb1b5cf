//! Copy pipeline
//!
//! Moves a header and then packets from a [`Source`] into a [`Sink`]. Used
//! on both sides of a channel: publisher input into the queue, and a cursor
//! into a subscriber's muxer.

use crate::av::{CodecSet, Sink, Source};
use crate::error::{Error, Result};

/// Copy driver bound to one sink
///
/// The header reaches the sink exactly once, however many times `run` is
/// called against new sources.
pub struct Pipeline<K> {
    sink: K,
    header: Option<CodecSet>,
    packets: u64,
}

impl<K: Sink> Pipeline<K> {
    pub fn new(sink: K) -> Self {
        Self {
            sink,
            header: None,
            packets: 0,
        }
    }

    /// Drain `source` into the sink until end of stream
    ///
    /// Source failures come back as upstream errors, sink failures as
    /// downstream errors. Nothing is retried and nothing is cleaned up here.
    pub async fn run<S: Source>(&mut self, source: &mut S) -> Result<u64> {
        let streams = source.streams().await.map_err(Error::upstream)?;

        match &self.header {
            Some(written) if *written != streams => return Err(Error::CodecSetMismatch),
            Some(_) => {}
            None => {
                self.sink
                    .write_header(&streams)
                    .await
                    .map_err(Error::downstream)?;
                self.header = Some(streams);
            }
        }

        let mut copied = 0;
        while let Some(packet) = source.read_packet().await.map_err(Error::upstream)? {
            self.sink
                .write_packet(&packet)
                .await
                .map_err(Error::downstream)?;
            copied += 1;
        }

        self.packets += copied;
        Ok(copied)
    }

    /// Finish the sink and hand it back
    pub async fn finish(mut self) -> Result<K> {
        if self.header.is_some() {
            self.sink.write_trailer().await.map_err(Error::downstream)?;
        }
        Ok(self.sink)
    }

    pub fn header_written(&self) -> bool {
        self.header.is_some()
    }

    /// Packets copied over all runs
    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }
}

/// One-shot copy: header, packets, trailer
pub async fn copy<S: Source, K: Sink>(source: &mut S, sink: K) -> Result<u64> {
    let mut pipeline = Pipeline::new(sink);
    let copied = pipeline.run(source).await?;
    pipeline.finish().await?;
    Ok(copied)
}
