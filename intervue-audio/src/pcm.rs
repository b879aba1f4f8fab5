use anyhow::Context;
use rubato::Resampler;

/// Sample rate expected by the transcription service.
pub const TARGET_SAMPLE_RATE_HZ: u32 = 16_000;

/// Average interleaved frames into one mono channel.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Convert samples in [-1, 1] to 16-bit little-endian PCM. Out-of-range input is clamped.
pub fn f32_to_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn sinc_params() -> rubato::SincInterpolationParameters {
    rubato::SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: rubato::SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: rubato::WindowFunction::BlackmanHarris2,
    }
}

/// Turns a continuous mono f32 stream at the device rate into fixed-cadence
/// PCM16 LE chunks at [`TARGET_SAMPLE_RATE_HZ`].
///
/// One resampler is kept across chunks so its filter state carries over and
/// chunk boundaries stay seamless.
pub struct PcmChunker {
    frames_per_chunk: usize,
    pending: Vec<f32>,
    resampler: Option<rubato::SincFixedIn<f32>>,
}

impl PcmChunker {
    pub fn new(input_sample_rate_hz: u32, chunk_interval_ms: u32) -> anyhow::Result<Self> {
        anyhow::ensure!(input_sample_rate_hz > 0, "invalid input sample rate");
        anyhow::ensure!(chunk_interval_ms > 0, "invalid chunk interval");

        let frames_per_chunk =
            (input_sample_rate_hz as u64 * chunk_interval_ms as u64 / 1000).max(1) as usize;

        let resampler = if input_sample_rate_hz == TARGET_SAMPLE_RATE_HZ {
            None
        } else {
            Some(
                rubato::SincFixedIn::<f32>::new(
                    TARGET_SAMPLE_RATE_HZ as f64 / input_sample_rate_hz as f64,
                    2.0,
                    sinc_params(),
                    frames_per_chunk,
                    1,
                )
                .context("create resampler")?,
            )
        };

        Ok(Self {
            frames_per_chunk,
            pending: Vec::with_capacity(frames_per_chunk * 2),
            resampler,
        })
    }

    pub fn frames_per_chunk(&self) -> usize {
        self.frames_per_chunk
    }

    /// Buffer mono samples; returns every chunk completed by this push.
    pub fn push(&mut self, mono: &[f32]) -> anyhow::Result<Vec<Vec<u8>>> {
        self.pending.extend_from_slice(mono);

        let mut chunks = Vec::new();
        while self.pending.len() >= self.frames_per_chunk {
            let block: Vec<f32> = self.pending.drain(..self.frames_per_chunk).collect();
            let resampled = match self.resampler.as_mut() {
                None => block,
                Some(r) => {
                    let out = r.process(&[block], None).context("resample chunk")?;
                    out.into_iter().next().unwrap_or_default()
                }
            };
            chunks.push(f32_to_pcm16_le(&resampled));
        }
        Ok(chunks)
    }
}
