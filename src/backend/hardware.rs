//! CPAL hardware output.

use super::AudioBackend;
use crate::{Error, Result, SoundDriver};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Holds a `cpal::Stream` in a `Send` context.
///
/// `cpal::Stream` is `!Send` because of platform internals. The backend
/// owning it is only driven from the control thread (behind the
/// supervisor), and the stream is dropped there too.
struct StreamHandle(#[allow(dead_code)] cpal::Stream);

// SAFETY: the stream is never accessed concurrently; it is created, kept and
// dropped by whichever thread owns the backend.
unsafe impl Send for StreamHandle {}

/// Plays the master out on a CPAL output device at the engine's sample
/// rate. Extra device channels get silence; a mono device gets the mid
/// signal.
pub struct CpalBackend {
    output_device_index: Option<usize>,
    stream: Option<StreamHandle>,
    alive: Arc<AtomicBool>,
}

impl CpalBackend {
    /// `None` selects the host's default output device.
    pub fn new(output_device_index: Option<usize>) -> Self {
        Self {
            output_device_index,
            stream: None,
            alive: Arc::new(AtomicBool::new(false)),
        }
    }

    fn get_device(index: Option<usize>) -> Result<cpal::Device> {
        let host = cpal::default_host();

        if let Some(idx) = index {
            let devices: Vec<_> = host.output_devices()?.collect();
            let device_count = devices.len();
            devices.into_iter().nth(idx).ok_or_else(|| {
                Error::Backend(format!(
                    "output device index {} out of range (available: {})",
                    idx, device_count
                ))
            })
        } else {
            host.default_output_device()
                .ok_or_else(|| Error::Backend("no output device available".to_string()))
        }
    }

    fn build_stream<T>(
        &self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        driver: Arc<SoundDriver>,
    ) -> Result<cpal::Stream>
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        let channels = config.channels as usize;
        let mut io = driver.create_io(driver.config().block_size);
        let alive = Arc::clone(&self.alive);

        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let frames = data.len() / channels;
                    let mut done = 0;
                    // Device periods need not match ours; run in chunks.
                    while done < frames {
                        let n = (frames - done).min(io.max_frames());
                        driver.process(&mut io, n);
                        let [left, right] = io.master();
                        let out = &mut data[done * channels..(done + n) * channels];
                        for (frame, samples) in out.chunks_exact_mut(channels).enumerate() {
                            if channels == 1 {
                                samples[0] = T::from_sample((left[frame] + right[frame]) * 0.5);
                                continue;
                            }
                            for (channel, sample) in samples.iter_mut().enumerate() {
                                let value = match channel {
                                    0 => left[frame],
                                    1 => right[frame],
                                    _ => 0.0,
                                };
                                *sample = T::from_sample(value);
                            }
                        }
                        done += n;
                    }
                }));

                if result.is_err() {
                    // Panic in callback - output silence
                    for sample in data.iter_mut() {
                        *sample = T::from_sample(0.0);
                    }
                }
            },
            move |_err| {
                // Stream errors end the stream; the supervisor notices.
                alive.store(false, Ordering::Release);
            },
            None,
        )?;

        Ok(stream)
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn start(&mut self, driver: Arc<SoundDriver>) -> Result<()> {
        self.stop();

        let device = Self::get_device(self.output_device_index)?;
        let supported = device.default_output_config()?;
        let config = cpal::StreamConfig {
            channels: supported.channels(),
            sample_rate: cpal::SampleRate(driver.sample_rate()),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => self.build_stream::<f32>(&device, &config, driver)?,
            cpal::SampleFormat::I16 => self.build_stream::<i16>(&device, &config, driver)?,
            cpal::SampleFormat::U16 => self.build_stream::<u16>(&device, &config, driver)?,
            format => {
                return Err(Error::Backend(format!(
                    "unsupported sample format: {:?}",
                    format
                )));
            }
        };

        stream.play()?;
        self.stream = Some(StreamHandle(stream));
        self.alive.store(true, Ordering::Release);
        tracing::info!(
            "CPAL output on {} ({} channels, {} Hz)",
            device.name().unwrap_or_else(|_| "unknown device".into()),
            config.channels,
            config.sample_rate.0
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.alive.store(false, Ordering::Release);
        self.stream = None;
    }

    fn is_alive(&self) -> bool {
        self.stream.is_some() && self.alive.load(Ordering::Acquire)
    }
}

/// Available output devices, as `index: name`.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices: Result<Vec<String>> = host
        .output_devices()?
        .enumerate()
        .map(|(idx, device)| Ok(format!("{}: {}", idx, device.name()?)))
        .collect();
    devices
}
