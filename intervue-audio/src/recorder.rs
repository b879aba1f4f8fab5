//
// CPAL-based streaming recorder.
//
// Supported platforms:
// - Windows
// - macOS
//
// Samples are downmixed, resampled to 16 kHz and delivered as PCM16 LE chunks
// at a fixed cadence through a caller-supplied sink.

use std::sync::mpsc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Sample, SampleFormat, SizedSample, Stream};

use crate::pcm::{PcmChunker, downmix_to_mono};

#[derive(Debug, thiserror::Error)]
pub enum AudioCaptureError {
    #[error("no input device found")]
    NoInputDevice,

    #[error("failed to list input devices: {0}")]
    ListDevices(#[from] cpal::DevicesError),

    #[error("failed to get default config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("audio worker failed: {0}")]
    Worker(String),

    #[error("audio worker startup timeout")]
    WorkerTimeout,

    #[error("failed to prepare resampler: {0}")]
    Resample(#[from] anyhow::Error),
}

/// Receives each finished PCM16 LE chunk. Returning false stops the recorder.
pub type ChunkSink = Box<dyn FnMut(Vec<u8>) -> bool + Send + 'static>;

enum WorkerMsg {
    Ready,
    Error(String),
}

/// A running input stream. Dropping it stops capture and releases the device.
pub struct ChunkedRecorder {
    shutdown_tx: mpsc::Sender<()>,
    worker_handle: Option<std::thread::JoinHandle<()>>,
    device_sample_rate_hz: u32,
}

impl ChunkedRecorder {
    pub fn list_input_device_names() -> Result<Vec<String>, AudioCaptureError> {
        let host = cpal::default_host();
        let mut out = Vec::new();
        for dev in host.input_devices()? {
            if let Ok(name) = dev.name() {
                out.push(name);
            }
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    /// Open `device_name` if present, otherwise the default input device.
    pub fn start_named(
        device_name: Option<&str>,
        chunk_interval_ms: u32,
        sink: ChunkSink,
    ) -> Result<Self, AudioCaptureError> {
        let host = cpal::default_host();

        if let Some(needle) = device_name.map(str::trim).filter(|n| !n.is_empty()) {
            if let Ok(devices) = host.input_devices() {
                for dev in devices {
                    if dev.name().is_ok_and(|name| name == needle) {
                        log::info!("Using input device: {needle}");
                        return Self::start(dev, chunk_interval_ms, sink);
                    }
                }
            }
            log::warn!("Preferred input device not found, falling back to default: {needle}");
        }

        let device = host
            .default_input_device()
            .ok_or(AudioCaptureError::NoInputDevice)?;
        Self::start(device, chunk_interval_ms, sink)
    }

    pub fn start(
        device: Device,
        chunk_interval_ms: u32,
        sink: ChunkSink,
    ) -> Result<Self, AudioCaptureError> {
        // Capture at the device's native config; resampling happens per chunk.
        let default_cfg = device.default_input_config()?;
        let device_sample_rate_hz = default_cfg.sample_rate().0;
        let chunker = PcmChunker::new(device_sample_rate_hz, chunk_interval_ms)?;

        let (sample_tx, sample_rx) = mpsc::channel::<Vec<f32>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (worker_tx, worker_rx) = mpsc::channel::<WorkerMsg>();

        let worker_handle = std::thread::spawn(move || {
            let config = default_cfg;
            let channels = config.channels() as usize;
            let stream_cfg: cpal::StreamConfig = config.clone().into();

            let stream = match config.sample_format() {
                SampleFormat::I16 => build_input_stream::<i16>(&device, &stream_cfg, channels, sample_tx),
                SampleFormat::U16 => build_input_stream::<u16>(&device, &stream_cfg, channels, sample_tx),
                SampleFormat::I8 => build_input_stream::<i8>(&device, &stream_cfg, channels, sample_tx),
                SampleFormat::U8 => build_input_stream::<u8>(&device, &stream_cfg, channels, sample_tx),
                SampleFormat::I32 => build_input_stream::<i32>(&device, &stream_cfg, channels, sample_tx),
                SampleFormat::U32 => build_input_stream::<u32>(&device, &stream_cfg, channels, sample_tx),
                SampleFormat::F64 => build_input_stream::<f64>(&device, &stream_cfg, channels, sample_tx),
                _ => build_input_stream::<f32>(&device, &stream_cfg, channels, sample_tx),
            };

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    log::error!("Audio stream build failed: {e}");
                    let _ = worker_tx.send(WorkerMsg::Error(format!("build stream: {e}")));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                log::error!("Audio stream play failed: {e}");
                let _ = worker_tx.send(WorkerMsg::Error(format!("play stream: {e}")));
                return;
            }

            let _ = worker_tx.send(WorkerMsg::Ready);

            run_consumer(sample_rx, shutdown_rx, chunker, sink);
            drop(stream);
            log::info!("Audio stream closed");
        });

        // Block briefly until the worker has either started the stream or failed.
        match worker_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(WorkerMsg::Ready) => {}
            Ok(WorkerMsg::Error(e)) => return Err(AudioCaptureError::Worker(e)),
            Err(mpsc::RecvTimeoutError::Timeout) => return Err(AudioCaptureError::WorkerTimeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(AudioCaptureError::Worker("audio worker exited".into()));
            }
        }

        log::info!("Audio stream started at {device_sample_rate_hz} Hz");
        Ok(Self {
            shutdown_tx,
            worker_handle: Some(worker_handle),
            device_sample_rate_hz,
        })
    }

    pub fn device_sample_rate_hz(&self) -> u32 {
        self.device_sample_rate_hz
    }
}

impl Drop for ChunkedRecorder {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(h) = self.worker_handle.take() {
            let _ = h.join();
        }
    }
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    sample_tx: mpsc::Sender<Vec<f32>>,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: Sample + SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let mut scratch: Vec<f32> = Vec::new();

    let cb = move |data: &[T], _: &cpal::InputCallbackInfo| {
        scratch.clear();
        scratch.extend(data.iter().map(|&s| s.to_sample::<f32>()));
        let _ = sample_tx.send(downmix_to_mono(&scratch, channels));
    };

    device.build_input_stream(
        config,
        cb,
        |err| {
            // These errors are crucial to debug "recording started but silent".
            log::error!("Audio stream error: {err}");
        },
        None,
    )
}

fn run_consumer(
    sample_rx: mpsc::Receiver<Vec<f32>>,
    shutdown_rx: mpsc::Receiver<()>,
    mut chunker: PcmChunker,
    mut sink: ChunkSink,
) {
    loop {
        // Always check for shutdown promptly, even if the stream is stalled.
        match shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => return,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        match sample_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(samples) => {
                let chunks = match chunker.push(&samples) {
                    Ok(c) => c,
                    Err(e) => {
                        log::error!("Audio chunking failed: {e:#}");
                        return;
                    }
                };
                for chunk in chunks {
                    if !sink(chunk) {
                        return;
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}
