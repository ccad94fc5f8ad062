//! Host ⇄ server volume synchronisation
//!
//! Either side may change the volume. The last value seen on either path is
//! remembered so the server echoing our own change back, or the host
//! echoing a server change, does not bounce forever.

use crate::error::OperationError;
use crate::host::Host;
use crate::server::{ChannelVolumes, OpId, ServerBackend, Volume};

#[derive(Debug, Default)]
pub struct VolumeBridge {
    last_known: Option<Volume>,
}

impl VolumeBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_known(&self) -> Option<Volume> {
        self.last_known
    }

    /// Forget the last value, e.g. when the stream goes away
    pub fn reset(&mut self) {
        self.last_known = None;
    }

    /// Send the host's volume to the stream's sink input without waiting
    pub fn push_local_volume(
        &mut self,
        backend: &mut dyn ServerBackend,
        host: &dyn Host,
        sink_input: Option<u32>,
        channels: usize,
        enabled: bool,
    ) -> Result<OpId, OperationError> {
        if !enabled {
            return Err(OperationError::Disabled);
        }
        let index = sink_input.ok_or(OperationError::NoSinkInput)?;
        let volume = Volume::from_linear(host.volume());
        self.last_known = Some(volume);
        tracing::debug!(index, volume = volume.0, "pushing volume to server");
        Ok(backend.set_sink_input_volume(index, &ChannelVolumes::uniform(channels, volume)))
    }

    /// Apply a volume reported by the server. Returns true when the host
    /// volume was updated.
    pub fn on_remote_volume_changed(&mut self, host: &dyn Host, volumes: &ChannelVolumes, enabled: bool) -> bool {
        if !enabled {
            return false;
        }
        let volume = volumes.avg();
        if self.last_known == Some(volume) {
            return false;
        }
        self.last_known = Some(volume);

        if volume.is_above_norm() {
            tracing::debug!(volume = volume.0, "not propagating volume above 100%");
            return false;
        }
        host.set_volume(volume.to_linear());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{OutputEvent, TrackMetadata};
    use crate::server::sim::SimConnector;
    use crate::server::{Connector, Mainloop, ServerEvent};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct VolumeHost {
        volume: Mutex<f32>,
        sets: Mutex<Vec<f32>>,
    }

    impl Host for VolumeHost {
        fn read(&self, _buf: &mut [u8]) -> isize {
            0
        }
        fn ok_to_read(&self) -> bool {
            false
        }
        fn volume(&self) -> f32 {
            *self.volume.lock()
        }
        fn set_volume(&self, amplitude: f32) {
            *self.volume.lock() = amplitude;
            self.sets.lock().push(amplitude);
        }
        fn config_str(&self, _key: &str, default: &str) -> String {
            default.to_string()
        }
        fn config_int(&self, _key: &str, default: i64) -> i64 {
            default
        }
        fn notify(&self, _event: OutputEvent) {}
        fn current_track(&self) -> Option<TrackMetadata> {
            None
        }
    }

    #[test]
    fn test_same_value_applied_once() {
        let host = VolumeHost::default();
        let mut bridge = VolumeBridge::new();
        let half = ChannelVolumes::uniform(2, Volume(Volume::NORM.0 / 2));

        assert!(bridge.on_remote_volume_changed(&host, &half, true));
        assert!(!bridge.on_remote_volume_changed(&host, &half, true));
        assert_eq!(host.sets.lock().len(), 1);
        assert!((host.volume() - 0.125).abs() < 1e-6);
    }

    #[test]
    fn test_above_unity_not_propagated() {
        let host = VolumeHost::default();
        let mut bridge = VolumeBridge::new();
        let loud = ChannelVolumes::uniform(2, Volume(Volume::NORM.0 * 3 / 2));
        assert!(!bridge.on_remote_volume_changed(&host, &loud, true));
        assert!(host.sets.lock().is_empty());

        let unity = ChannelVolumes::uniform(2, Volume::NORM);
        assert!(bridge.on_remote_volume_changed(&host, &unity, true));
        assert_eq!(host.volume(), 1.0);
    }

    #[test]
    fn test_disabled() {
        let host = VolumeHost::default();
        let mut bridge = VolumeBridge::new();
        let unity = ChannelVolumes::uniform(2, Volume::NORM);
        assert!(!bridge.on_remote_volume_changed(&host, &unity, false));
        assert_eq!(bridge.last_known(), None);
    }

    #[test]
    fn test_push_requires_sink_input() {
        let host = VolumeHost::default();
        let connector = SimConnector::new();
        let (events, _inbox) = Mainloop::<Vec<ServerEvent>>::channel();
        let mut backend = connector.open(events);
        let mut bridge = VolumeBridge::new();

        assert_eq!(
            bridge.push_local_volume(backend.as_mut(), &host, None, 2, true),
            Err(OperationError::NoSinkInput)
        );
        assert_eq!(
            bridge.push_local_volume(backend.as_mut(), &host, Some(0), 2, false),
            Err(OperationError::Disabled)
        );
        assert_eq!(bridge.last_known(), None);
    }

    #[test]
    fn test_push_records_echo() {
        let host = VolumeHost::default();
        *host.volume.lock() = 0.125;
        let connector = SimConnector::new();
        let (events, _inbox) = Mainloop::<Vec<ServerEvent>>::channel();
        let mut backend = connector.open(events);
        let mut bridge = VolumeBridge::new();

        // unknown index still records the value and issues the request
        assert!(bridge.push_local_volume(backend.as_mut(), &host, Some(7), 2, true).is_ok());
        let echoed = ChannelVolumes::uniform(2, Volume::from_linear(0.125));
        assert!(!bridge.on_remote_volume_changed(&host, &echoed, true));
        assert!(host.sets.lock().is_empty());
    }
}
