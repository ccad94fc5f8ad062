//! Output device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::AudioError;
use crate::server::OutputDevice;

/// List the output devices of the default cpal host
pub fn list_output_devices() -> Result<Vec<OutputDevice>, AudioError> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    let mut out = Vec::new();
    for device in devices {
        let Ok(name) = device.name() else {
            continue;
        };
        let (sample_rates, channels) = device_capabilities(&device);
        let description = describe(&name, &sample_rates, &channels);
        let is_default = default_name.as_ref() == Some(&name);
        out.push(OutputDevice {
            name,
            description,
            is_default,
        });
    }
    Ok(out)
}

/// Find an output device by name, or the default device for `None`
pub fn find_output_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    let Some(name) = name else {
        return host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("no default output device".to_string()));
    };

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(AudioError::DeviceNotFound(name.to_string()))
}

/// Common sample rates and channel counts the device supports
fn device_capabilities(device: &cpal::Device) -> (Vec<u32>, Vec<u16>) {
    let mut rates = Vec::new();
    let mut channels = Vec::new();

    if let Ok(configs) = device.supported_output_configs() {
        for config in configs {
            for rate_val in [44_100u32, 48_000, 88_200, 96_000, 176_400, 192_000] {
                let rate = cpal::SampleRate(rate_val);
                if rate >= config.min_sample_rate() && rate <= config.max_sample_rate() && !rates.contains(&rate_val) {
                    rates.push(rate_val);
                }
            }
            if !channels.contains(&config.channels()) {
                channels.push(config.channels());
            }
        }
    }

    rates.sort_unstable();
    channels.sort_unstable();
    (rates, channels)
}

fn describe(name: &str, rates: &[u32], channels: &[u16]) -> String {
    let max_rate = rates.last().copied().unwrap_or(0);
    let max_channels = channels.last().copied().unwrap_or(0);
    if max_rate == 0 {
        name.to_string()
    } else {
        format!("{name} (up to {max_channels}ch, {}kHz)", max_rate as f32 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        assert_eq!(describe("hw:0", &[], &[]), "hw:0");
        assert_eq!(
            describe("hw:0", &[44_100, 48_000], &[2, 8]),
            "hw:0 (up to 8ch, 48kHz)"
        );
    }

    #[test]
    fn test_missing_device() {
        // may run without any audio hardware
        assert!(find_output_device(Some("no such device, surely")).is_err());
    }
}
