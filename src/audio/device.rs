//! Sound card output
//!
//! The cpal stream lives on a dedicated thread for its whole lifetime. The
//! playback task writes PCM into a shared ring buffer that the stream's
//! callback drains.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::buffer::{create_shared_buffer, SharedRingBuffer};
use crate::audio::sink::{AudioSink, RingBufferSink};
use crate::constants::{CHANNELS, OUTPUT_BUFFER_SAMPLES, SAMPLE_RATE};
use crate::error::AudioError;

/// Names of the available output devices
pub fn list_output_devices() -> Vec<String> {
    let host = cpal::default_host();
    match host.output_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate output devices: {}", e);
            Vec::new()
        }
    }
}

/// Find an output device by name, or the default one
fn find_output_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    let Some(name) = name else {
        return host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()));
    };

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
    for device in devices {
        if device.name().ok().as_deref() == Some(name) {
            return Ok(device);
        }
    }
    Err(AudioError::DeviceNotFound(name.to_string()))
}

/// Sink playing on a sound card
pub struct DeviceSink {
    device_name: String,
    /// Cleared to end the stream thread
    running: Arc<AtomicBool>,
    buffer: SharedRingBuffer,
    writer: RingBufferSink,
    thread_handle: Option<JoinHandle<()>>,
    /// Errors raised by the stream callback
    error_rx: Receiver<AudioError>,
}

impl DeviceSink {
    /// Open an output stream at 44.1 kHz stereo i16
    pub fn open(device_name: Option<&str>) -> Result<Self, AudioError> {
        let device = find_output_device(device_name)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let config = StreamConfig {
            channels: CHANNELS,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = create_shared_buffer(OUTPUT_BUFFER_SAMPLES);
        let running = Arc::new(AtomicBool::new(true));
        let (error_tx, error_rx) = bounded::<AudioError>(16);

        let running_for_loop = running.clone();
        let callback_buffer = buffer.clone();
        let thread_name = name.clone();

        let handle = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        callback_buffer.fill(data);
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!("Failed to start output on {}: {}", thread_name, e);
                            return;
                        }

                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(std::time::Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to build output stream on {}: {}", thread_name, e);
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        tracing::info!("Playing audio on {}", name);

        Ok(Self {
            device_name: name,
            running,
            writer: RingBufferSink::new(buffer.clone()),
            buffer,
            thread_handle: Some(handle),
            error_rx,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Fraction of the output buffer currently filled
    pub fn fill_level(&self) -> f32 {
        self.buffer.fill_level()
    }

    /// Next error reported by the stream, if any
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }

    /// End the stream and join its thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl AudioSink for DeviceSink {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        if let Some(err) = self.check_errors() {
            tracing::warn!("Output stream error on {}: {}", self.device_name, err);
        }
        if !self.running.load(Ordering::Relaxed) {
            return Err(AudioError::SinkClosed);
        }
        self.writer.write(pcm)
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        self.stop();
    }
}
