pub mod pcm;

// Capture backends exist only where cpal is enabled.
#[cfg(any(windows, target_os = "macos"))]
pub mod recorder;

#[cfg(any(windows, target_os = "macos"))]
pub use recorder::{AudioCaptureError, ChunkSink, ChunkedRecorder};
