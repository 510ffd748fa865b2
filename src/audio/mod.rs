//! Local audio output

pub mod buffer;
#[cfg(feature = "device-output")]
pub mod device;
pub mod sink;
pub mod volume;

pub use buffer::RingBuffer;
pub use sink::{AudioSink, MemorySink, NullSink, RingBufferSink};
pub use volume::adjust_audio;

#[cfg(feature = "device-output")]
pub use device::{list_output_devices, DeviceSink};
