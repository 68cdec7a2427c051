// Speaker Output
//
// The CPAL output callback pulls mono f32 from the playback queue in
// fixed-size pieces and spreads each sample across every device channel.
// Silence is written whenever the queue runs dry.

use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream};
use tracing::{error, info};

use crate::error::DeviceError;
use crate::playback::PlaybackConsumer;

/// List available output device names
pub fn list_output_devices() -> Result<Vec<String>, DeviceError> {
    let host = cpal::default_host();
    let devices = host.output_devices().context("failed to enumerate output devices")?;
    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

fn find_output_device(name: Option<&str>) -> Result<cpal::Device, DeviceError> {
    let host = cpal::default_host();
    if let Some(name) = name {
        let found = host
            .output_devices()
            .context("failed to enumerate output devices")?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false));
        if let Some(device) = found {
            return Ok(device);
        }
        info!(requested = name, "output device not found, using default");
    }
    host.default_output_device().ok_or(DeviceError::NotFound("output"))
}

pub struct SpeakerOutput {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    stream: Option<Stream>,
}

impl SpeakerOutput {
    /// Acquire the device and its default config. No stream is built until `start`.
    pub fn new(device_name: Option<&str>) -> Result<Self, DeviceError> {
        let device = find_output_device(device_name)?;
        let config = device
            .default_output_config()
            .context("failed to get default output config")?;

        info!(
            device = %device.name().unwrap_or_default(),
            sample_rate = config.sample_rate().0,
            channels = config.channels(),
            format = ?config.sample_format(),
            "speaker opened"
        );

        Ok(Self {
            device,
            config,
            stream: None,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    pub fn start(&mut self, consumer: PlaybackConsumer, pull_samples: usize) -> Result<(), DeviceError> {
        let stream = match self.config.sample_format() {
            SampleFormat::F32 => self.build::<f32>(consumer, pull_samples)?,
            SampleFormat::I16 => self.build::<i16>(consumer, pull_samples)?,
            SampleFormat::I32 => self.build::<i32>(consumer, pull_samples)?,
            SampleFormat::U16 => self.build::<u16>(consumer, pull_samples)?,
            format => return Err(DeviceError::UnsupportedFormat(format!("{format:?}"))),
        };
        stream.play().context("failed to start output stream")?;
        self.stream = Some(stream);
        info!("speaker stream started");
        Ok(())
    }

    fn build<T>(&self, mut consumer: PlaybackConsumer, pull_samples: usize) -> Result<Stream, DeviceError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = (self.config.channels() as usize).max(1);
        let pull_samples = pull_samples.max(1);
        let mut scratch = vec![0.0f32; pull_samples];
        let err_fn = |err| error!(error = %err, "output stream error");

        let stream = self
            .device
            .build_output_stream(
                &self.config.clone().into(),
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    for block in data.chunks_mut(pull_samples * channels) {
                        let frames = block.len() / channels;
                        let mono = &mut scratch[..frames];
                        consumer.fill(mono);
                        for (frame, &sample) in block.chunks_mut(channels).zip(mono.iter()) {
                            let value = T::from_sample(sample);
                            frame.fill(value);
                        }
                    }
                },
                err_fn,
                None,
            )
            .context("failed to build output stream")?;
        Ok(stream)
    }

    pub fn pause(&self) -> Result<(), DeviceError> {
        if let Some(ref stream) = self.stream {
            stream.pause().context("failed to pause output stream")?;
            info!("speaker stream paused");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
        }
    }
}
