//! H.264/AVC configuration parsing
//!
//! FLV carries H.264 in AVCC format (length-prefixed NAL units).
//!
//! AVC Video Tag Body:
//! ```text
//! +----------+----------+-----------------+
//! |FrameType | CodecID  | AVCPacketType   | CompositionTime | Data
//! | (4 bits) | (4 bits) | (1 byte)        | (3 bytes, SI24) |
//! +----------+----------+-----------------+
//! ```
//!
//! AVCPacketType:
//! - 0: AVC sequence header (AVCDecoderConfigurationRecord)
//! - 1: AVC NALU (one or more NALUs)
//! - 2: AVC end of sequence
//!
//! AVCDecoderConfigurationRecord (sequence header):
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | lengthSizeMinusOne (1, lower 2 bits)
//! | numOfSPS (1, lower 5 bits) | { spsLength (2) | spsNALUnit }*
//! | numOfPPS (1) | { ppsLength (2) | ppsNALUnit }*
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::MediaError;

/// AVC packet type
///
/// Also used by the legacy HEVC (12) and AV1 (13) codec ids, which follow
/// the same tag body layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    /// Sequence header (AVCDecoderConfigurationRecord)
    SequenceHeader = 0,
    /// NAL units
    Nalu = 1,
    /// End of sequence
    EndOfSequence = 2,
}

impl AvcPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AvcPacketType::SequenceHeader),
            1 => Some(AvcPacketType::Nalu),
            2 => Some(AvcPacketType::EndOfSequence),
            _ => None,
        }
    }
}

/// AVC decoder configuration (from sequence header)
#[derive(Debug, Clone)]
pub struct AvcConfig {
    /// AVC profile (66=Baseline, 77=Main, 100=High, etc.)
    pub profile: u8,
    /// AVC level (e.g., 31 = 3.1)
    pub level: u8,
    /// NALU length prefix size in bytes
    pub nalu_length_size: u8,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
}

impl AvcConfig {
    /// Parse an AVCDecoderConfigurationRecord
    pub fn parse(mut data: Bytes) -> Result<Self, MediaError> {
        if data.len() < 7 {
            return Err(MediaError::InvalidAvcConfig);
        }

        if data.get_u8() != 1 {
            return Err(MediaError::InvalidAvcConfig);
        }

        let profile = data.get_u8();
        let _compatibility = data.get_u8();
        let level = data.get_u8();
        let nalu_length_size = (data.get_u8() & 0x03) + 1;

        let num_sps = (data.get_u8() & 0x1F) as usize;
        let sps = read_parameter_sets(&mut data, num_sps)?;

        if data.is_empty() {
            return Err(MediaError::InvalidAvcConfig);
        }
        let num_pps = data.get_u8() as usize;
        let pps = read_parameter_sets(&mut data, num_pps)?;

        Ok(AvcConfig {
            profile,
            level,
            nalu_length_size,
            sps,
            pps,
        })
    }

    pub fn profile_name(&self) -> &'static str {
        match self.profile {
            66 => "Baseline",
            77 => "Main",
            88 => "Extended",
            100 => "High",
            110 => "High 10",
            122 => "High 4:2:2",
            244 => "High 4:4:4",
            _ => "Unknown",
        }
    }

    /// Level as a string (e.g., "3.1")
    pub fn level_string(&self) -> String {
        format!("{}.{}", self.level / 10, self.level % 10)
    }

    /// Collect SPS and PPS units from an Annex B byte stream
    ///
    /// Encoders that emit start-code framed headers (libx264 and friends)
    /// produce their global header this way.
    pub fn from_annexb(data: &[u8]) -> Result<Self, MediaError> {
        let mut sps = Vec::new();
        let mut pps = Vec::new();
        for nal in split_annexb(data) {
            match nal_type(nal) {
                NAL_SPS => sps.push(Bytes::copy_from_slice(nal)),
                NAL_PPS => pps.push(Bytes::copy_from_slice(nal)),
                _ => {}
            }
        }

        let first = sps.first().ok_or(MediaError::InvalidAvcConfig)?;
        if first.len() < 4 || pps.is_empty() {
            return Err(MediaError::InvalidAvcConfig);
        }

        Ok(AvcConfig {
            profile: first[1],
            level: first[3],
            nalu_length_size: 4,
            sps,
            pps,
        })
    }

    /// Serialize as an AVCDecoderConfigurationRecord
    pub fn to_bytes(&self) -> Bytes {
        let compatibility = self.sps.first().and_then(|s| s.get(2)).copied().unwrap_or(0);

        let mut buf = BytesMut::new();
        buf.put_u8(1);
        buf.put_u8(self.profile);
        buf.put_u8(compatibility);
        buf.put_u8(self.level);
        buf.put_u8(0xFC | (self.nalu_length_size.clamp(1, 4) - 1));
        buf.put_u8(0xE0 | (self.sps.len() as u8 & 0x1F));
        for sps in &self.sps {
            buf.put_u16(sps.len() as u16);
            buf.put_slice(sps);
        }
        buf.put_u8(self.pps.len() as u8);
        for pps in &self.pps {
            buf.put_u16(pps.len() as u16);
            buf.put_slice(pps);
        }
        buf.freeze()
    }
}

const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const NAL_AUD: u8 = 9;

fn nal_type(nal: &[u8]) -> u8 {
    nal.first().map_or(0, |b| b & 0x1F)
}

/// Split an Annex B stream on `00 00 01` / `00 00 00 01` start codes
pub fn split_annexb(data: &[u8]) -> Vec<&[u8]> {
    let mut units = Vec::new();
    let mut start = None;
    let mut i = 0;

    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            if let Some(s) = start {
                units.push(trim_trailing_zeros(&data[s..i]));
            }
            i += 3;
            start = Some(i);
        } else {
            i += 1;
        }
    }
    if let Some(s) = start {
        units.push(&data[s..]);
    }

    units.retain(|nal| !nal.is_empty());
    units
}

fn trim_trailing_zeros(nal: &[u8]) -> &[u8] {
    let end = nal.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    &nal[..end]
}

/// Re-frame an Annex B access unit with 4-byte length prefixes
///
/// Parameter sets and access unit delimiters are dropped; FLV carries them
/// in the sequence header instead.
pub fn annexb_to_avcc(data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(data.len() + 16);
    for nal in split_annexb(data) {
        if matches!(nal_type(nal), NAL_SPS | NAL_PPS | NAL_AUD) {
            continue;
        }
        buf.put_u32(nal.len() as u32);
        buf.put_slice(nal);
    }
    buf.freeze()
}

fn read_parameter_sets(data: &mut Bytes, count: usize) -> Result<Vec<Bytes>, MediaError> {
    let mut sets = Vec::with_capacity(count);
    for _ in 0..count {
        if data.len() < 2 {
            return Err(MediaError::InvalidAvcConfig);
        }
        let len = data.get_u16() as usize;
        if data.len() < len {
            return Err(MediaError::InvalidAvcConfig);
        }
        sets.push(data.copy_to_bytes(len));
    }
    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avc_config_parse() {
        let data = Bytes::from_static(&[
            0x01, // version
            0x64, // profile (High)
            0x00, // compatibility
            0x1F, // level 3.1
            0xFF, // length size minus one = 3
            0xE1, // 1 SPS
            0x00, 0x04, 0x67, 0x64, 0x00, 0x1F, // SPS
            0x01, // 1 PPS
            0x00, 0x02, 0x68, 0xEE, // PPS
        ]);

        let config = AvcConfig::parse(data).unwrap();
        assert_eq!(config.profile, 100);
        assert_eq!(config.profile_name(), "High");
        assert_eq!(config.level_string(), "3.1");
        assert_eq!(config.nalu_length_size, 4);
        assert_eq!(config.sps.len(), 1);
        assert_eq!(config.pps[0].as_ref(), &[0x68, 0xEE]);
    }

    #[test]
    fn test_avc_config_truncated() {
        let data = Bytes::from_static(&[0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x10, 0x67]);
        assert!(matches!(AvcConfig::parse(data), Err(MediaError::InvalidAvcConfig)));
    }

    #[test]
    fn test_avc_config_bad_version() {
        let data = Bytes::from_static(&[0x02, 0x64, 0x00, 0x1F, 0xFF, 0xE0, 0x00]);
        assert!(AvcConfig::parse(data).is_err());
    }

    #[test]
    fn test_annexb_split() {
        let stream = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x64, 0x00, 0x1F, // SPS, 4-byte start code
            0x00, 0x00, 0x01, 0x68, 0xEE, 0x00, // PPS with trailing zero
            0x00, 0x00, 0x01, 0x65, 0x88, // IDR slice
        ];
        let units = split_annexb(&stream);
        assert_eq!(units, vec![&[0x67, 0x64, 0x00, 0x1F][..], &[0x68, 0xEE][..], &[0x65, 0x88][..]]);

        let avcc = annexb_to_avcc(&stream);
        assert_eq!(avcc.as_ref(), &[0x00, 0x00, 0x00, 0x02, 0x65, 0x88]);
    }

    #[test]
    fn test_config_from_annexb_round_trips() {
        let header = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x64, 0x00, 0x1F, 0xAC, //
            0x00, 0x00, 0x00, 0x01, 0x68, 0xEE, 0x3C, 0x80,
        ];
        let config = AvcConfig::from_annexb(&header).unwrap();
        assert_eq!(config.profile_name(), "High");
        assert_eq!(config.level_string(), "3.1");

        let parsed = AvcConfig::parse(config.to_bytes()).unwrap();
        assert_eq!(parsed.nalu_length_size, 4);
        assert_eq!(parsed.sps, config.sps);
        assert_eq!(parsed.pps[0].as_ref(), &[0x68, 0xEE, 0x3C, 0x80]);
    }

    #[test]
    fn test_config_from_annexb_needs_pps() {
        let header = [0x00, 0x00, 0x01, 0x67, 0x64, 0x00, 0x1F];
        assert!(AvcConfig::from_annexb(&header).is_err());
    }

    #[test]
    fn test_avc_packet_type() {
        assert_eq!(AvcPacketType::from_byte(0), Some(AvcPacketType::SequenceHeader));
        assert_eq!(AvcPacketType::from_byte(1), Some(AvcPacketType::Nalu));
        assert_eq!(AvcPacketType::from_byte(2), Some(AvcPacketType::EndOfSequence));
        assert_eq!(AvcPacketType::from_byte(3), None);
    }
}
