//! PCM16 mono audio frames exchanged between the Room and the pipelines.

/// A single PCM16 mono frame. Nominal room input is 48 kHz; pipelines
/// resample to whatever the active provider requires (commonly 16 kHz or
/// 24 kHz). Frames are 10-20 ms each; time-base is `1 / sample_rate_hz`.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate_hz: u32,
    pub timestamp: std::time::Instant,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate_hz: u32) -> Self {
        Self {
            samples,
            sample_rate_hz,
            timestamp: std::time::Instant::now(),
        }
    }

    pub fn duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate_hz as f64)
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * 2);
        for s in &self.samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8], sample_rate_hz: u32) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        Self::new(samples, sample_rate_hz)
    }
}
