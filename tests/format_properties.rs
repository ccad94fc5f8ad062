//! Property tests for format negotiation and volume conversion

use proptest::prelude::*;

use pulse_output::constants::MAX_SAMPLE_RATE;
use pulse_output::format::{negotiate, BufferAttr, ChannelMap, SampleEncoding, WaveFormat};
use pulse_output::server::Volume;
use pulse_output::FormatError;

fn any_format() -> impl Strategy<Value = WaveFormat> {
    (any::<u16>(), 0u16..=40, any::<u32>(), any::<u32>(), any::<bool>()).prop_map(
        |(bits, channels, sample_rate, channel_mask, is_float)| WaveFormat {
            bits,
            channels,
            sample_rate,
            channel_mask,
            is_float,
        },
    )
}

proptest! {
    #[test]
    fn zero_channels_gives_generic(bits in any::<u16>(), rate in any::<u32>(), is_float in any::<bool>()) {
        let mut format = WaveFormat::new(bits, 0, rate);
        format.is_float = is_float;
        let negotiated = negotiate(&format).unwrap();
        prop_assert_eq!(negotiated.format, WaveFormat::generic());
    }

    #[test]
    fn integer_depths_map_to_integer_encodings(
        bits in prop::sample::select(vec![8u16, 16, 24, 32]),
        channels in 1u16..=32,
        rate in 1u32..=MAX_SAMPLE_RATE,
    ) {
        let negotiated = negotiate(&WaveFormat::new(bits, channels, rate)).unwrap();
        let expected = match bits {
            8 => SampleEncoding::U8,
            16 => SampleEncoding::S16Le,
            24 => SampleEncoding::S24Le,
            _ => SampleEncoding::S32Le,
        };
        prop_assert_eq!(negotiated.spec.encoding, expected);
        prop_assert_eq!(negotiated.spec.channels as u16, channels);
        prop_assert_eq!(negotiated.channel_map.channels(), channels as usize);
    }

    #[test]
    fn float_only_at_32_bits(channels in 1u16..=32, rate in 1u32..=MAX_SAMPLE_RATE) {
        let negotiated = negotiate(&WaveFormat::float32(channels, rate)).unwrap();
        prop_assert_eq!(negotiated.spec.encoding, SampleEncoding::F32Le);
    }

    #[test]
    fn other_depths_rejected(bits in any::<u16>(), channels in 1u16..=32, is_float in any::<bool>()) {
        prop_assume!(![8, 16, 24, 32].contains(&bits));
        let mut format = WaveFormat::new(bits, channels, 44_100);
        format.is_float = is_float;
        prop_assert_eq!(negotiate(&format), Err(FormatError::UnsupportedBitDepth(bits)));
    }

    #[test]
    fn rate_never_exceeds_maximum(format in any_format()) {
        if let Ok(negotiated) = negotiate(&format) {
            prop_assert!(negotiated.spec.rate <= MAX_SAMPLE_RATE);
            prop_assert!(negotiated.spec.rate > 0);
            prop_assert!(negotiated.spec.is_valid());
        }
    }

    #[test]
    fn negotiation_is_deterministic(format in any_format()) {
        prop_assert_eq!(negotiate(&format), negotiate(&format));
    }

    #[test]
    fn channel_map_matches_count(channels in 1u8..=32) {
        let map = ChannelMap::waveex_extended(channels);
        prop_assert_eq!(map.channels(), channels as usize);
    }

    #[test]
    fn buffer_target_is_whole_frames(
        bits in prop::sample::select(vec![8u16, 16, 24, 32]),
        channels in 1u16..=8,
        rate in 8_000u32..=MAX_SAMPLE_RATE,
        ms in any::<u32>(),
    ) {
        let spec = negotiate(&WaveFormat::new(bits, channels, rate)).unwrap().spec;
        let attr = BufferAttr::for_latency(&spec, ms);
        prop_assert!(attr.tlength as usize >= spec.frame_size());
        prop_assert_eq!(attr.tlength as usize % spec.frame_size(), 0);
    }

    #[test]
    fn volume_round_trips_near_identity(amplitude in 0.001f32..=1.0) {
        let back = Volume::from_linear(amplitude).to_linear();
        prop_assert!((back - amplitude).abs() < 1e-3);
    }

    #[test]
    fn volume_conversion_is_monotonic(a in 0.0f32..=1.0, b in 0.0f32..=1.0) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(Volume::from_linear(lo) <= Volume::from_linear(hi));
    }

    #[test]
    fn unity_or_below_never_above_norm(amplitude in 0.0f32..=1.0) {
        prop_assert!(!Volume::from_linear(amplitude).is_above_norm());
    }
}
