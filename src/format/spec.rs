//! Wave format, sample spec and channel map types

use serde::{Deserialize, Serialize};

use crate::constants::{MAX_BUFFER_MS, MAX_CHANNELS, MIN_BUFFER_MS};

/// Format requested by the host player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WaveFormat {
    /// Bits per sample
    pub bits: u16,
    /// Channel count (0 means "no preference")
    pub channels: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Speaker mask, informational only
    pub channel_mask: u32,
    /// Samples are IEEE floats
    pub is_float: bool,
}

impl WaveFormat {
    pub const fn new(bits: u16, channels: u16, sample_rate: u32) -> Self {
        Self {
            bits,
            channels,
            sample_rate,
            channel_mask: 0,
            is_float: false,
        }
    }

    pub const fn float32(channels: u16, sample_rate: u32) -> Self {
        Self {
            bits: 32,
            channels,
            sample_rate,
            channel_mask: 0,
            is_float: true,
        }
    }

    /// Generic stereo 16-bit 44.1kHz format
    pub const fn generic() -> Self {
        Self {
            bits: 16,
            channels: 2,
            sample_rate: 44_100,
            channel_mask: 3,
            is_float: false,
        }
    }
}

impl Default for WaveFormat {
    fn default() -> Self {
        Self::generic()
    }
}

impl std::fmt::Display for WaveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}bit {} {}ch {}Hz mask={:#X}",
            self.bits,
            if self.is_float { "float" } else { "int" },
            self.channels,
            self.sample_rate,
            self.channel_mask
        )
    }
}

/// Sample encodings understood by the server (little endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleEncoding {
    U8,
    S16Le,
    S24Le,
    S32Le,
    F32Le,
}

impl SampleEncoding {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleEncoding::U8 => 1,
            SampleEncoding::S16Le => 2,
            SampleEncoding::S24Le => 3,
            SampleEncoding::S32Le | SampleEncoding::F32Le => 4,
        }
    }

    /// Byte value that encodes silence
    pub fn silence_byte(self) -> u8 {
        match self {
            SampleEncoding::U8 => 0x80,
            _ => 0,
        }
    }

    /// Decode one little-endian sample to f32 in `[-1, 1]`.
    ///
    /// `bytes` must hold at least `bytes_per_sample()` bytes.
    pub fn decode_f32(self, bytes: &[u8]) -> f32 {
        match self {
            SampleEncoding::U8 => (bytes[0] as f32 - 128.0) / 128.0,
            SampleEncoding::S16Le => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32_768.0,
            SampleEncoding::S24Le => {
                let raw = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
                raw as f32 / 8_388_608.0
            }
            SampleEncoding::S32Le => {
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32
                    / 2_147_483_648.0
            }
            SampleEncoding::F32Le => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }
}

/// Negotiated sample parameters of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleSpec {
    pub encoding: SampleEncoding,
    pub rate: u32,
    pub channels: u8,
}

impl SampleSpec {
    pub fn frame_size(&self) -> usize {
        self.encoding.bytes_per_sample() * self.channels as usize
    }

    /// Bytes per second of audio
    pub fn byte_rate(&self) -> usize {
        self.frame_size() * self.rate as usize
    }

    pub fn is_valid(&self) -> bool {
        self.rate > 0 && self.channels > 0 && self.channels as usize <= MAX_CHANNELS
    }

    /// Convert a duration to a byte count, rounded down to whole frames
    pub fn ms_to_bytes(&self, ms: u32) -> usize {
        let frames = self.rate as u64 * ms as u64 / 1000;
        frames as usize * self.frame_size()
    }
}

/// Speaker positions used for channel maps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelPosition {
    Mono,
    FrontLeft,
    FrontRight,
    FrontCenter,
    Lfe,
    RearLeft,
    RearRight,
    FrontLeftOfCenter,
    FrontRightOfCenter,
    RearCenter,
    SideLeft,
    SideRight,
    TopCenter,
    TopFrontLeft,
    TopFrontCenter,
    TopFrontRight,
    TopRearLeft,
    TopRearCenter,
    TopRearRight,
    Aux(u8),
}

/// WAVEFORMATEXTENSIBLE speaker order
const WAVEEX_ORDER: [ChannelPosition; 18] = [
    ChannelPosition::FrontLeft,
    ChannelPosition::FrontRight,
    ChannelPosition::FrontCenter,
    ChannelPosition::Lfe,
    ChannelPosition::RearLeft,
    ChannelPosition::RearRight,
    ChannelPosition::FrontLeftOfCenter,
    ChannelPosition::FrontRightOfCenter,
    ChannelPosition::RearCenter,
    ChannelPosition::SideLeft,
    ChannelPosition::SideRight,
    ChannelPosition::TopCenter,
    ChannelPosition::TopFrontLeft,
    ChannelPosition::TopFrontCenter,
    ChannelPosition::TopFrontRight,
    ChannelPosition::TopRearLeft,
    ChannelPosition::TopRearCenter,
    ChannelPosition::TopRearRight,
];

/// Ordered channel positions of a stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelMap {
    positions: Vec<ChannelPosition>,
}

impl ChannelMap {
    /// Extended WAVEEX layout: mono for one channel, the WAVEEX order for up
    /// to 18, auxiliary positions beyond that.
    pub fn waveex_extended(channels: u8) -> Self {
        let channels = (channels as usize).min(MAX_CHANNELS);
        let positions = if channels == 1 {
            vec![ChannelPosition::Mono]
        } else {
            (0..channels)
                .map(|i| {
                    WAVEEX_ORDER
                        .get(i)
                        .copied()
                        .unwrap_or_else(|| ChannelPosition::Aux((i - WAVEEX_ORDER.len()) as u8))
                })
                .collect()
        };
        Self { positions }
    }

    pub fn channels(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[ChannelPosition] {
        &self.positions
    }
}

/// Server-side buffer metrics; `u32::MAX` lets the server pick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAttr {
    pub maxlength: u32,
    pub tlength: u32,
    pub prebuf: u32,
    pub minreq: u32,
}

impl BufferAttr {
    pub const DEFAULT: u32 = u32::MAX;

    /// Target length derived from a latency in milliseconds
    pub fn for_latency(spec: &SampleSpec, buffer_ms: u32) -> Self {
        let ms = buffer_ms.clamp(MIN_BUFFER_MS, MAX_BUFFER_MS);
        let tlength = spec.ms_to_bytes(ms).max(spec.frame_size());
        Self {
            maxlength: Self::DEFAULT,
            tlength: tlength.min(u32::MAX as usize - 1) as u32,
            prebuf: Self::DEFAULT,
            minreq: Self::DEFAULT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waveex_map() {
        assert_eq!(ChannelMap::waveex_extended(1).positions(), &[ChannelPosition::Mono]);
        assert_eq!(
            ChannelMap::waveex_extended(2).positions(),
            &[ChannelPosition::FrontLeft, ChannelPosition::FrontRight]
        );

        let surround = ChannelMap::waveex_extended(6);
        assert_eq!(surround.positions()[3], ChannelPosition::Lfe);
        assert_eq!(surround.positions()[5], ChannelPosition::RearRight);

        let wide = ChannelMap::waveex_extended(20);
        assert_eq!(wide.channels(), 20);
        assert_eq!(wide.positions()[18], ChannelPosition::Aux(0));
        assert_eq!(wide.positions()[19], ChannelPosition::Aux(1));
    }

    #[test]
    fn test_waveex_map_every_count() {
        for channels in 2..=MAX_CHANNELS as u8 {
            let map = ChannelMap::waveex_extended(channels);
            assert_eq!(map.channels(), channels as usize);
            for (i, position) in map.positions().iter().enumerate() {
                match WAVEEX_ORDER.get(i) {
                    Some(expected) => assert_eq!(position, expected),
                    None => assert_eq!(*position, ChannelPosition::Aux((i - WAVEEX_ORDER.len()) as u8)),
                }
            }
        }
    }

    #[test]
    fn test_buffer_attr_from_latency() {
        let spec = SampleSpec {
            encoding: SampleEncoding::S16Le,
            rate: 44_100,
            channels: 2,
        };
        let attr = BufferAttr::for_latency(&spec, 100);
        // 4410 frames * 4 bytes
        assert_eq!(attr.tlength, 17_640);
        assert_eq!(attr.maxlength, BufferAttr::DEFAULT);
        assert_eq!(attr.tlength as usize % spec.frame_size(), 0);
    }

    #[test]
    fn test_buffer_attr_clamps_latency() {
        let spec = SampleSpec {
            encoding: SampleEncoding::S24Le,
            rate: 48_000,
            channels: 2,
        };
        let tiny = BufferAttr::for_latency(&spec, 0);
        assert_eq!(tiny.tlength as usize, spec.ms_to_bytes(MIN_BUFFER_MS));
        let huge = BufferAttr::for_latency(&spec, 60_000);
        assert_eq!(huge.tlength as usize, spec.ms_to_bytes(MAX_BUFFER_MS));
    }

    #[test]
    fn test_decode_samples() {
        assert_eq!(SampleEncoding::U8.decode_f32(&[0x80]), 0.0);
        assert_eq!(SampleEncoding::S16Le.decode_f32(&0x4000i16.to_le_bytes()), 0.5);
        assert_eq!(SampleEncoding::S24Le.decode_f32(&[0x00, 0x00, 0xC0]), -0.5);
        assert_eq!(SampleEncoding::F32Le.decode_f32(&0.25f32.to_le_bytes()), 0.25);
    }

    #[test]
    fn test_silence_byte() {
        assert_eq!(SampleEncoding::U8.silence_byte(), 0x80);
        assert_eq!(SampleEncoding::S16Le.silence_byte(), 0);
        assert_eq!(SampleEncoding::F32Le.silence_byte(), 0);
    }
}
