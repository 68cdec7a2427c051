// Microphone Capture - Lock-Free Real-Time Compliant
//
// Architecture:
// 1. CPAL callback: ONLY pushes mono f32 samples to a lock-free ring buffer
// 2. No mutexes, allocations, or DSP in callback
// 3. DSP thread (capture.rs) drains the buffer, resamples, runs VAD

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use ringbuf::traits::{Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{error, info};

use crate::error::DeviceError;

/// List available input device names
pub fn list_input_devices() -> Result<Vec<String>, DeviceError> {
    let host = cpal::default_host();
    let devices = host.input_devices().context("failed to enumerate input devices")?;
    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

fn find_input_device(name: Option<&str>) -> Result<cpal::Device, DeviceError> {
    let host = cpal::default_host();
    if let Some(name) = name {
        let found = host
            .input_devices()
            .context("failed to enumerate input devices")?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false));
        if let Some(device) = found {
            return Ok(device);
        }
        info!(requested = name, "input device not found, using default");
    }
    host.default_input_device().ok_or(DeviceError::NotFound("input"))
}

/// Lock-free microphone stream
///
/// Callback pushes raw f32 samples to ring buffer.
/// Consumer is polled by the DSP thread.
pub struct MicrophoneStream {
    stream: Option<Stream>,
    consumer: Option<HeapCons<f32>>,
    sample_rate: u32,
    is_running: Arc<AtomicBool>,
}

impl MicrophoneStream {
    pub fn new(device_name: Option<&str>, ring_buffer_samples: usize) -> Result<Self, DeviceError> {
        let device = find_input_device(device_name)?;
        let config = device
            .default_input_config()
            .context("failed to get default input config")?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;

        info!(
            device = %device.name().unwrap_or_default(),
            sample_rate,
            channels,
            format = ?config.sample_format(),
            "microphone opened"
        );

        // Create lock-free SPSC ring buffer
        let rb = HeapRb::<f32>::new(ring_buffer_samples);
        let (producer, consumer) = rb.split();

        let is_running = Arc::new(AtomicBool::new(false));

        let stream = build_input_stream(&device, &config, producer, channels, Arc::clone(&is_running))?;

        Ok(Self {
            stream: Some(stream),
            consumer: Some(consumer),
            sample_rate,
            is_running,
        })
    }

    /// Start capturing audio
    pub fn play(&self) -> Result<(), DeviceError> {
        if let Some(ref stream) = self.stream {
            stream.play().context("failed to start input stream")?;
            self.is_running.store(true, Ordering::SeqCst);
            info!("microphone stream started");
        }
        Ok(())
    }

    /// Pause capturing
    pub fn pause(&self) -> Result<(), DeviceError> {
        if let Some(ref stream) = self.stream {
            self.is_running.store(false, Ordering::SeqCst);
            stream.pause().context("failed to pause input stream")?;
            info!("microphone stream paused");
        }
        Ok(())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Take ownership of the consumer for the DSP thread
    pub fn take_consumer(&mut self) -> Option<HeapCons<f32>> {
        self.consumer.take()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

/// Build input stream with lock-free callback
///
/// The callback ONLY pushes to the ring buffer; multi-channel input keeps the first channel.
fn build_input_stream(
    device: &cpal::Device,
    config: &cpal::SupportedStreamConfig,
    mut producer: HeapProd<f32>,
    channels: usize,
    is_running: Arc<AtomicBool>,
) -> Result<Stream, DeviceError> {
    let err_fn = |err| error!(error = %err, "input stream error");
    let channels = channels.max(1);

    let stream = match config.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config.clone().into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !is_running.load(Ordering::Relaxed) {
                    return;
                }
                if channels > 1 {
                    for frame in data.chunks(channels) {
                        let _ = producer.try_push(frame[0]);
                    }
                } else {
                    let _ = producer.push_slice(data);
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config.clone().into(),
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if !is_running.load(Ordering::Relaxed) {
                    return;
                }
                for frame in data.chunks(channels) {
                    let _ = producer.try_push(frame[0] as f32 / 32768.0);
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::I32 => device.build_input_stream(
            &config.clone().into(),
            move |data: &[i32], _: &cpal::InputCallbackInfo| {
                if !is_running.load(Ordering::Relaxed) {
                    return;
                }
                for frame in data.chunks(channels) {
                    let _ = producer.try_push(frame[0] as f32 / 2147483648.0);
                }
            },
            err_fn,
            None,
        ),
        format => return Err(DeviceError::UnsupportedFormat(format!("{format:?}"))),
    };

    Ok(stream.context("failed to build input stream")?)
}

impl Drop for MicrophoneStream {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        // Stream will be dropped and stopped automatically
    }
}
