//! Local device output through cpal

pub mod backend;
pub mod buffer;
pub mod device;
pub mod playback;

pub use backend::{CpalBackend, CpalConnector};
pub use buffer::{SampleDecoder, SampleQueue};
pub use device::{find_output_device, list_output_devices};
pub use playback::{DeviceStream, StreamParams, StreamShared};
