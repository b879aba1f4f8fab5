use async_trait::async_trait;
use intervue_engine::traits::{AudioSource, CaptureError, CaptureFormat, Microphone};

/// System microphone via the cpal recorder. On platforms without a capture
/// backend every acquisition reports the device as unavailable.
#[derive(Debug, Clone, Default)]
pub struct SystemMicrophone {
    device_name: Option<String>,
}

impl SystemMicrophone {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

#[cfg(any(windows, target_os = "macos"))]
mod backend {
    use super::*;
    use intervue_audio::pcm::TARGET_SAMPLE_RATE_HZ;
    use intervue_audio::{AudioCaptureError, ChunkedRecorder};
    use tokio::sync::mpsc;

    fn should_log_dropped(dropped: u64) -> bool {
        dropped == 1 || dropped % 50 == 0
    }

    struct RecorderSource {
        // Held for its Drop, which stops the device stream.
        _recorder: ChunkedRecorder,
        chunks: mpsc::Receiver<Vec<u8>>,
    }

    #[async_trait]
    impl AudioSource for RecorderSource {
        async fn next_chunk(&mut self) -> Option<Vec<u8>> {
            self.chunks.recv().await
        }
    }

    fn map_error(e: AudioCaptureError) -> CaptureError {
        match e {
            AudioCaptureError::NoInputDevice => {
                CaptureError::DeviceUnavailable("no input device found".into())
            }
            other => CaptureError::DeviceUnavailable(other.to_string()),
        }
    }

    pub(super) async fn acquire(
        device_name: Option<String>,
        format: &CaptureFormat,
    ) -> Result<Box<dyn AudioSource>, CaptureError> {
        if format.sample_rate_hz != TARGET_SAMPLE_RATE_HZ {
            return Err(CaptureError::DeviceUnavailable(format!(
                "unsupported capture rate {} Hz",
                format.sample_rate_hz
            )));
        }
        let interval_ms = u32::try_from(format.chunk_interval.as_millis())
            .unwrap_or(u32::MAX)
            .max(1);

        let (tx, rx) = mpsc::channel::<Vec<u8>>(32);
        let mut dropped: u64 = 0;
        let sink = Box::new(move |chunk: Vec<u8>| match tx.try_send(chunk) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                dropped = dropped.saturating_add(1);
                if should_log_dropped(dropped) {
                    log::warn!("microphone: consumer lagging, dropped {dropped} chunks");
                }
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        // Opening the device blocks until the stream is running.
        let recorder = tokio::task::spawn_blocking(move || {
            ChunkedRecorder::start_named(device_name.as_deref(), interval_ms, sink)
        })
        .await
        .map_err(|e| CaptureError::DeviceUnavailable(format!("audio worker panicked: {e}")))?
        .map_err(map_error)?;

        Ok(Box::new(RecorderSource {
            _recorder: recorder,
            chunks: rx,
        }))
    }
}

#[async_trait]
impl Microphone for SystemMicrophone {
    async fn acquire(&self, format: &CaptureFormat) -> Result<Box<dyn AudioSource>, CaptureError> {
        #[cfg(any(windows, target_os = "macos"))]
        {
            backend::acquire(self.device_name.clone(), format).await
        }

        #[cfg(not(any(windows, target_os = "macos")))]
        {
            let _ = (format, &self.device_name);
            Err(CaptureError::DeviceUnavailable(
                "no audio capture backend on this platform".into(),
            ))
        }
    }
}
