use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Floor applied before the log so empty bins stay finite.
const POWER_FLOOR: f32 = 1.0e-20;

/// Helper that wraps the `rustfft` planner for frame-averaged power spectra.
pub struct FftHelper {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    window_power: f32,
}

impl FftHelper {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let window: Vec<f32> = if size == 1 {
            vec![1.0]
        } else {
            (0..size)
                .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / size as f32).cos())
                .collect()
        };
        let window_power = window.iter().map(|w| w * w).sum();
        Self {
            fft,
            window,
            window_power,
        }
    }

    pub fn size(&self) -> usize {
        self.window.len()
    }

    /// Hann-windowed power spectrum averaged over whole frames, in dB relative to
    /// full scale, ordered from the lowest to the highest frequency (DC centred).
    ///
    /// Returns an empty vector when fewer samples than one frame are supplied.
    pub fn averaged_power_db(&self, samples: &[Complex32]) -> Vec<f32> {
        let size = self.size();
        let mut accumulated = vec![0.0f32; size];
        let mut frames = 0usize;
        let mut buffer = vec![Complex32::new(0.0, 0.0); size];

        for frame in samples.chunks_exact(size) {
            for ((slot, sample), weight) in buffer.iter_mut().zip(frame).zip(&self.window) {
                *slot = *sample * *weight;
            }
            self.fft.process(&mut buffer);
            for (acc, bin) in accumulated.iter_mut().zip(&buffer) {
                *acc += bin.norm_sqr();
            }
            frames += 1;
        }

        if frames == 0 {
            return Vec::new();
        }

        accumulated.rotate_right(size / 2);
        let norm = frames as f32 * self.window_power;
        accumulated
            .into_iter()
            .map(|power| 10.0 * (power / norm).max(POWER_FLOOR).log10())
            .collect()
    }
}
