//! `onMetaData` script tag
//!
//! Publishers describe their streams here (resolution, frame rate,
//! bitrates). The demuxer folds these values into the [`CodecSet`]; the
//! muxer writes one back out for players.

use bytes::Bytes;

use crate::av::{CodecSet, StreamInfo};
use crate::error::MediaError;

use super::amf::{self, ScriptValue};
use super::flv::{AudioFormat, VideoCodec};

pub const ON_METADATA: &str = "onMetaData";

/// Stream properties announced by `onMetaData`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub framerate: Option<f64>,
    /// kbit/s
    pub video_data_rate: Option<f64>,
    /// kbit/s
    pub audio_data_rate: Option<f64>,
    pub audio_sample_rate: Option<f64>,
    pub stereo: Option<bool>,
    pub video_codec_id: Option<f64>,
    pub audio_codec_id: Option<f64>,
}

impl Metadata {
    /// Parse a script tag body
    ///
    /// Returns `Ok(None)` for script tags other than `onMetaData`.
    pub fn parse(data: Bytes) -> Result<Option<Self>, MediaError> {
        let values = amf::decode_all(data)?;
        let mut values = values.iter();

        match values.next().and_then(ScriptValue::as_str) {
            Some(ON_METADATA) => {}
            _ => return Ok(None),
        }
        let Some(props) = values.next() else {
            return Ok(Some(Self::default()));
        };

        let number = |key: &str| props.get(key).and_then(ScriptValue::as_number);

        Ok(Some(Self {
            width: number("width"),
            height: number("height"),
            framerate: number("framerate").or_else(|| number("videoframerate")),
            video_data_rate: number("videodatarate"),
            audio_data_rate: number("audiodatarate"),
            audio_sample_rate: number("audiosamplerate"),
            stereo: props.get("stereo").and_then(ScriptValue::as_bool),
            video_codec_id: number("videocodecid"),
            audio_codec_id: number("audiocodecid"),
        }))
    }

    /// Describe a codec set
    pub fn from_streams(streams: &CodecSet) -> Self {
        let mut meta = Self::default();

        for stream in streams.streams() {
            match stream {
                StreamInfo::Video(v) if meta.width.is_none() => {
                    meta.width = Some(v.width as f64);
                    meta.height = Some(v.height as f64);
                    if v.framerate.num > 0 {
                        meta.framerate = Some(v.framerate.as_f64());
                    }
                    meta.video_data_rate = v.bitrate.map(|b| b as f64 / 1000.0);
                    meta.video_codec_id =
                        VideoCodec::from_codec_type(v.codec).map(|c| c as u8 as f64);
                }
                StreamInfo::Audio(a) if meta.audio_codec_id.is_none() => {
                    meta.audio_sample_rate = Some(a.sample_rate as f64);
                    meta.stereo = Some(a.channels >= 2);
                    meta.audio_codec_id = Some(AudioFormat::from_codec_type(a.codec) as u8 as f64);
                }
                _ => {}
            }
        }

        meta
    }

    /// Encode as a script tag body
    pub fn encode(&self) -> Bytes {
        let mut props = Vec::new();
        let mut push = |key: &str, value: Option<ScriptValue>| {
            if let Some(value) = value {
                props.push((key.to_string(), value));
            }
        };

        push("width", self.width.map(ScriptValue::Number));
        push("height", self.height.map(ScriptValue::Number));
        push("framerate", self.framerate.map(ScriptValue::Number));
        push("videodatarate", self.video_data_rate.map(ScriptValue::Number));
        push("videocodecid", self.video_codec_id.map(ScriptValue::Number));
        push("audiodatarate", self.audio_data_rate.map(ScriptValue::Number));
        push("audiosamplerate", self.audio_sample_rate.map(ScriptValue::Number));
        push("stereo", self.stereo.map(ScriptValue::Boolean));
        push("audiocodecid", self.audio_codec_id.map(ScriptValue::Number));
        push("encoder", Some(ScriptValue::String(concat!("avrelay/", env!("CARGO_PKG_VERSION")).into())));

        amf::encode_all(&[
            ScriptValue::String(ON_METADATA.into()),
            ScriptValue::EcmaArray(props),
        ])
    }
}
