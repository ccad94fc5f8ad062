//! Requested format → stream parameters
//!
//! Pure and deterministic: the same request always yields the same result.

use crate::constants::{MAX_CHANNELS, MAX_SAMPLE_RATE};
use crate::error::FormatError;
use crate::format::spec::{ChannelMap, SampleEncoding, SampleSpec, WaveFormat};

/// Result of a successful negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedFormat {
    /// The normalized format, as reported back to the host
    pub format: WaveFormat,
    pub spec: SampleSpec,
    pub channel_map: ChannelMap,
}

/// Validate and normalize a requested format.
///
/// - zero channels selects [`WaveFormat::generic`]
/// - the sample rate is clamped to [`MAX_SAMPLE_RATE`]
/// - 8/16/24/32 bits map to the matching integer encoding; 32 bits with the
///   float flag set maps to float
pub fn negotiate(requested: &WaveFormat) -> Result<NegotiatedFormat, FormatError> {
    let mut format = if requested.channels == 0 {
        WaveFormat::generic()
    } else {
        *requested
    };
    format.sample_rate = format.sample_rate.min(MAX_SAMPLE_RATE);

    let encoding = match (format.bits, format.is_float) {
        (8, _) => SampleEncoding::U8,
        (16, _) => SampleEncoding::S16Le,
        (24, _) => SampleEncoding::S24Le,
        (32, false) => SampleEncoding::S32Le,
        (32, true) => SampleEncoding::F32Le,
        (bits, _) => return Err(FormatError::UnsupportedBitDepth(bits)),
    };

    if format.channels as usize > MAX_CHANNELS {
        return Err(FormatError::InvalidSpec(format!(
            "{} channels exceeds the maximum of {}",
            format.channels, MAX_CHANNELS
        )));
    }

    let spec = SampleSpec {
        encoding,
        rate: format.sample_rate,
        channels: format.channels as u8,
    };
    if !spec.is_valid() {
        return Err(FormatError::InvalidSpec(format!("{format}")));
    }

    Ok(NegotiatedFormat {
        format,
        spec,
        channel_map: ChannelMap::waveex_extended(spec.channels),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_channels_uses_generic() {
        let requested = WaveFormat {
            bits: 24,
            channels: 0,
            sample_rate: 96_000,
            channel_mask: 0,
            is_float: true,
        };
        let negotiated = negotiate(&requested).unwrap();
        assert_eq!(negotiated.format, WaveFormat::generic());
        assert_eq!(negotiated.spec.encoding, SampleEncoding::S16Le);
        assert_eq!(negotiated.spec.rate, 44_100);
        assert_eq!(negotiated.spec.channels, 2);
    }

    #[test]
    fn test_encodings() {
        let cases = [
            (8, false, SampleEncoding::U8),
            (16, false, SampleEncoding::S16Le),
            (24, false, SampleEncoding::S24Le),
            (32, false, SampleEncoding::S32Le),
            (32, true, SampleEncoding::F32Le),
        ];
        for (bits, is_float, expected) in cases {
            let mut fmt = WaveFormat::new(bits, 2, 48_000);
            fmt.is_float = is_float;
            assert_eq!(negotiate(&fmt).unwrap().spec.encoding, expected);
        }
    }

    #[test]
    fn test_float_flag_ignored_below_32_bits() {
        let mut fmt = WaveFormat::new(16, 2, 48_000);
        fmt.is_float = true;
        assert_eq!(negotiate(&fmt).unwrap().spec.encoding, SampleEncoding::S16Le);
    }

    #[test]
    fn test_unsupported_bits() {
        let fmt = WaveFormat::new(20, 2, 48_000);
        assert_eq!(negotiate(&fmt), Err(FormatError::UnsupportedBitDepth(20)));
    }

    #[test]
    fn test_rate_clamped() {
        let fmt = WaveFormat::new(24, 2, 384_000);
        let negotiated = negotiate(&fmt).unwrap();
        assert_eq!(negotiated.spec.rate, MAX_SAMPLE_RATE);
        assert_eq!(negotiated.format.sample_rate, MAX_SAMPLE_RATE);
    }

    #[test]
    fn test_zero_rate_rejected() {
        let fmt = WaveFormat::new(16, 2, 0);
        assert!(matches!(negotiate(&fmt), Err(FormatError::InvalidSpec(_))));
    }

    #[test]
    fn test_too_many_channels() {
        let fmt = WaveFormat::new(16, 64, 48_000);
        assert!(matches!(negotiate(&fmt), Err(FormatError::InvalidSpec(_))));
    }
}
