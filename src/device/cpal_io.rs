//! CPAL device discovery and blocking streams.
//!
//! CPAL delivers audio through callbacks on its own threads. The streams here bridge
//! those callbacks to the blocking read/write model the device nodes expect, with an
//! `rtrb` ring buffer in between:
//!
//! - capture: callback pushes, [`InputStream::read`] waits until a chunk is there
//! - playback: [`OutputStream::write`] waits for room, callback pops
//!
//! `cpal::Stream` is not `Send` on every platform, so each stream lives on a small owner
//! thread that builds it, plays it and drops it when the node closes the stream.
//!
//! # Example: list devices
//!
//! ```no_run
//! use nodedsp::CpalBackend;
//!
//! for device in CpalBackend::list_inputs() {
//!     println!("[{}] {} ({} ch in)", device.index, device.name, device.max_input_channels);
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::{bounded, Sender};
use rtrb::{Consumer, Producer, RingBuffer};

use super::{AudioBackend, InputStream, OutputStream};
use crate::attribute::Direction;
use crate::error::{EngineError, NodeError};
use crate::settings::{InputSettings, OutputSettings, SampleFormat};

/// How long a device gets to start before opening is reported as failed
const OPEN_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Slack on top of the nominal chunk duration before a blocked call gives up
const STALL_GRACE: Duration = Duration::from_millis(100);

/// A device as enumerated by the default host.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    /// Position in the host's device list. This is the `device` settings field.
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
}

/// Opens streams on the system's default audio host.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }

    /// Every device of the default host, inputs and outputs alike.
    ///
    /// Returns an empty list if enumeration fails.
    pub fn devices() -> Vec<DeviceInfo> {
        let host = cpal::default_host();
        host.devices()
            .map(|devices| {
                devices
                    .enumerate()
                    .map(|(index, device)| DeviceInfo {
                        index,
                        name: device.name().unwrap_or_else(|_| "Unknown".into()),
                        max_input_channels: device
                            .supported_input_configs()
                            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                            .unwrap_or(0),
                        max_output_channels: device
                            .supported_output_configs()
                            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                            .unwrap_or(0),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Devices that can capture.
    pub fn list_inputs() -> Vec<DeviceInfo> {
        Self::devices()
            .into_iter()
            .filter(|d| d.max_input_channels > 0)
            .collect()
    }

    /// Devices that can play back.
    pub fn list_outputs() -> Vec<DeviceInfo> {
        Self::devices()
            .into_iter()
            .filter(|d| d.max_output_channels > 0)
            .collect()
    }
}

fn device_at(index: usize) -> Result<cpal::Device, EngineError> {
    let host = cpal::default_host();
    let mut devices = host.devices().map_err(|err| EngineError::DeviceUnavailable {
        index,
        reason: err.to_string(),
    })?;
    devices.nth(index).ok_or_else(|| EngineError::DeviceUnavailable {
        index,
        reason: "no device at this index".into(),
    })
}

fn stall_timeout(frames: usize, rate: u32) -> Duration {
    Duration::from_secs_f64(frames as f64 / rate.max(1) as f64) * 4 + STALL_GRACE
}

impl AudioBackend for CpalBackend {
    fn open_input(&self, settings: &InputSettings) -> Result<Box<dyn InputStream>, EngineError> {
        device_at(settings.device)?;

        let channels = settings.channels as usize;
        let capacity = (settings.chunk_size * channels * 8).next_power_of_two();
        let (producer, consumer) = RingBuffer::<f32>::new(capacity);
        let overflow = Arc::new(AtomicBool::new(false));

        let config = cpal::StreamConfig {
            channels: settings.channels,
            sample_rate: cpal::SampleRate(settings.rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let format = settings.format;
        let flag = Arc::clone(&overflow);
        let thread = StreamThread::spawn(Direction::Input, settings.device, move |device| {
            let stream = match format {
                SampleFormat::Float32 => build_input::<f32>(device, &config, producer, flag),
                SampleFormat::Int16 => build_input::<i16>(device, &config, producer, flag),
            };
            stream.map_err(|err| err.to_string())
        })?;

        tracing::info!(
            device = settings.device,
            channels,
            rate = settings.rate,
            chunk = settings.chunk_size,
            format = %settings.format,
            "input stream opened"
        );

        Ok(Box::new(CpalInput {
            consumer,
            channels,
            rate: settings.rate,
            overflow,
            thread,
        }))
    }

    fn open_output(&self, settings: &OutputSettings) -> Result<Box<dyn OutputStream>, EngineError> {
        device_at(settings.device)?;

        let channels = settings.channels as usize;
        // ~100ms of audio to absorb scheduling jitter
        let capacity = ((settings.rate as usize / 10) * channels)
            .next_power_of_two()
            .max(8192);
        let (producer, consumer) = RingBuffer::<f32>::new(capacity);
        let underrun = Arc::new(AtomicBool::new(false));

        let config = cpal::StreamConfig {
            channels: settings.channels,
            sample_rate: cpal::SampleRate(settings.rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let format = settings.format;
        let flag = Arc::clone(&underrun);
        let thread = StreamThread::spawn(Direction::Output, settings.device, move |device| {
            let stream = match format {
                SampleFormat::Float32 => build_output::<f32>(device, &config, consumer, channels, flag),
                SampleFormat::Int16 => build_output::<i16>(device, &config, consumer, channels, flag),
            };
            stream.map_err(|err| err.to_string())
        })?;

        tracing::info!(
            device = settings.device,
            channels,
            rate = settings.rate,
            format = %settings.format,
            "output stream opened"
        );

        Ok(Box::new(CpalOutput {
            producer,
            channels,
            rate: settings.rate,
            underrun,
            thread,
        }))
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: Producer<f32>,
    overflow: Arc<AtomicBool>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            // Only whole frames go in, so channels stay aligned across an overflow
            let room = producer.slots() / channels * channels;
            if room < data.len() {
                overflow.store(true, Ordering::Relaxed);
            }
            for &sample in &data[..room.min(data.len())] {
                let _ = producer.push(sample.to_sample::<f32>());
            }
        },
        |err| tracing::error!(%err, "input stream error"),
        None,
    )
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: Consumer<f32>,
    channels: usize,
    underrun: Arc<AtomicBool>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = channels.max(1);
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let mut starved = false;
            for frame in data.chunks_mut(channels) {
                if consumer.slots() >= frame.len() {
                    for sample in frame.iter_mut() {
                        *sample = consumer.pop().unwrap_or(0.0).to_sample::<T>();
                    }
                } else {
                    starved = true;
                    frame.iter_mut().for_each(|s| *s = 0.0f32.to_sample::<T>());
                }
            }
            if starved {
                underrun.store(true, Ordering::Relaxed);
            }
        },
        |err| tracing::error!(%err, "output stream error"),
        None,
    )
}

/// Owns a `cpal::Stream` on a dedicated thread until closed.
struct StreamThread {
    direction: Direction,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    fn spawn<B>(direction: Direction, index: usize, build: B) -> Result<Self, EngineError>
    where
        B: FnOnce(&cpal::Device) -> Result<cpal::Stream, String> + Send + 'static,
    {
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name(format!("nodedsp-{direction}-{index}"))
            .spawn(move || {
                let opened = device_at(index)
                    .map_err(|err| err.to_string())
                    .and_then(|device| build(&device))
                    .and_then(|stream| {
                        stream.play().map_err(|err| err.to_string())?;
                        Ok(stream)
                    });
                let stream = match opened {
                    Ok(stream) => stream,
                    Err(reason) => {
                        let _ = ready_tx.send(Err(reason));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Wakes on an explicit shutdown or when the sender is dropped
                let _ = shutdown_rx.recv();
                if let Err(err) = stream.pause() {
                    tracing::debug!(%err, "pause before close failed");
                }
                drop(stream);
            })?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(Self {
                direction,
                shutdown: Some(shutdown_tx),
                handle: Some(handle),
            }),
            Ok(Err(reason)) => {
                let _ = handle.join();
                Err(EngineError::StreamOpen {
                    direction,
                    index,
                    reason,
                })
            }
            Err(_) => Err(EngineError::StreamOpen {
                direction,
                index,
                reason: "timed out waiting for the device to start".into(),
            }),
        }
    }

    fn close(&mut self) -> Result<(), EngineError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| EngineError::StreamClose {
                direction: self.direction,
                reason: "stream thread panicked".into(),
            })?;
            tracing::info!(direction = %self.direction, "stream closed");
        }
        Ok(())
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct CpalInput {
    consumer: Consumer<f32>,
    channels: usize,
    rate: u32,
    overflow: Arc<AtomicBool>,
    thread: StreamThread,
}

impl InputStream for CpalInput {
    fn read(&mut self, frames: usize) -> Result<Vec<f32>, NodeError> {
        if self.thread.handle.is_none() {
            return Ok(Vec::new());
        }

        let wanted = frames * self.channels;
        let deadline = Instant::now() + stall_timeout(frames, self.rate);
        while self.consumer.slots() < wanted {
            if Instant::now() >= deadline {
                tracing::debug!(
                    available = self.consumer.slots(),
                    wanted,
                    "input stalled, reading what is there"
                );
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }
        if self.overflow.swap(false, Ordering::Relaxed) {
            tracing::debug!("input overflow, samples dropped");
        }

        let available = self.consumer.slots() / self.channels * self.channels;
        let n = available.min(wanted);
        let mut samples = Vec::with_capacity(n);
        while samples.len() < n {
            match self.consumer.pop() {
                Ok(sample) => samples.push(sample),
                Err(_) => break,
            }
        }
        Ok(samples)
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.thread.close()
    }
}

struct CpalOutput {
    producer: Producer<f32>,
    channels: usize,
    rate: u32,
    underrun: Arc<AtomicBool>,
    thread: StreamThread,
}

impl OutputStream for CpalOutput {
    fn write(&mut self, interleaved: &[f32]) -> Result<(), NodeError> {
        if self.thread.handle.is_none() {
            return Ok(());
        }

        let frames = interleaved.len() / self.channels;
        let deadline = Instant::now() + stall_timeout(frames, self.rate);
        let mut rest = interleaved;
        loop {
            let room = self.producer.slots() / self.channels * self.channels;
            let n = room.min(rest.len());
            for &sample in &rest[..n] {
                let _ = self.producer.push(sample);
            }
            rest = &rest[n..];

            if rest.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                tracing::debug!(dropped = rest.len(), "output stalled, dropping remainder");
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        if self.underrun.swap(false, Ordering::Relaxed) {
            tracing::trace!("output underrun");
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.thread.close()
    }
}
