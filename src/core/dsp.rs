use ndarray::{Array2, Array3, Axis};
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Below this the mixdown is treated as silence and left unscaled.
const MIN_STD: f32 = 1e-8;

/// Global statistics of the monophonic mixdown, shared by every channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormStats {
    pub mean: f32,
    pub std: f32,
}

impl NormStats {
    /// Mean and unbiased standard deviation of the channel average of a
    /// `(channels, frames)` waveform.
    pub fn from_waveform(wave: &Array2<f32>) -> Self {
        let Some(reference) = wave.mean_axis(Axis(0)) else {
            return Self { mean: 0.0, std: 1.0 };
        };
        let mean = reference.mean().unwrap_or(0.0);
        let std = if reference.len() > 1 {
            reference.std(1.0)
        } else {
            0.0
        };
        let std = if std.is_finite() && std > MIN_STD { std } else { 1.0 };
        Self { mean, std }
    }

    pub fn normalize(&self, wave: &Array2<f32>) -> Array2<f32> {
        wave.mapv(|x| (x - self.mean) / self.std)
    }

    /// Undo [`normalize`](Self::normalize) on `(sources, channels, frames)`.
    pub fn denormalize(&self, sources: Array3<f32>) -> Array3<f32> {
        sources.mapv_into(|x| x * self.std + self.mean)
    }
}

/// Periodic Hann window, as `torch.hann_window`.
fn compute_hann(n_fft: usize) -> Vec<f32> {
    if n_fft <= 1 {
        return vec![1.0];
    }
    (0..n_fft)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / n_fft as f32).cos())
        .collect()
}

/// Mirror `x` around its first and last samples. Falls back to zeros when
/// the signal is too short to reflect.
fn reflect_pad(x: &[f32], left: usize, right: usize) -> Vec<f32> {
    let n = x.len();
    if n < 2 || left >= n || right >= n {
        let mut out = vec![0.0; left + n + right];
        out[left..left + n].copy_from_slice(x);
        return out;
    }
    let mut out = Vec::with_capacity(left + n + right);
    out.extend((1..=left).rev().map(|i| x[i]));
    out.extend_from_slice(x);
    out.extend((1..=right).map(|i| x[n - 1 - i]));
    out
}

/// Short-time Fourier transform framed the way the hybrid demucs models
/// expect their spectral input.
pub struct Stft {
    n_fft: usize,
    hop: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl Stft {
    pub fn new(n_fft: usize, hop: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            n_fft,
            hop,
            fft: planner.plan_fft_forward(n_fft),
            window: compute_hann(n_fft),
        }
    }

    /// Complex-as-channels spectrogram of a stereo pair.
    ///
    /// Returns `(buffer, bins, frames)` with `bins = n_fft / 2` (Nyquist
    /// dropped) and `frames = ceil(len / hop)`. The buffer is `[4, bins,
    /// frames]` flattened, channels ordered L.re, L.im, R.re, R.im. Each
    /// side is reflect-padded by 1.5 hops, centered, and scaled by
    /// `1 / sqrt(n_fft)`.
    pub fn spectrogram_cac(&self, left: &[f32], right: &[f32]) -> (Vec<f32>, usize, usize) {
        let t = left.len().min(right.len());
        let (n_fft, hop) = (self.n_fft, self.hop);
        let frames = t.div_ceil(hop);
        let bins = n_fft / 2;

        let pad = hop / 2 * 3;
        let tail = pad + frames * hop - t;
        let prepare = |x: &[f32]| reflect_pad(&reflect_pad(&x[..t], pad, tail), bins, bins);
        let (l_sig, r_sig) = (prepare(left), prepare(right));

        let scale = 1.0 / (n_fft as f32).sqrt();
        let plane = bins * frames;
        let mut out = vec![0.0f32; 4 * plane];
        let mut buf_l = vec![Complex32::new(0.0, 0.0); n_fft];
        let mut buf_r = vec![Complex32::new(0.0, 0.0); n_fft];

        for fr in 0..frames {
            // The first two centered frames only see padding.
            let start = (fr + 2) * hop;
            let li = &l_sig[start..start + n_fft];
            let ri = &r_sig[start..start + n_fft];
            for i in 0..n_fft {
                let w = self.window[i];
                buf_l[i] = Complex32::new(li[i] * w, 0.0);
                buf_r[i] = Complex32::new(ri[i] * w, 0.0);
            }

            self.fft.process(&mut buf_l);
            self.fft.process(&mut buf_r);

            for fi in 0..bins {
                let at = fi * frames + fr;
                out[at] = buf_l[fi].re * scale;
                out[plane + at] = buf_l[fi].im * scale;
                out[2 * plane + at] = buf_r[fi].re * scale;
                out[3 * plane + at] = buf_r[fi].im * scale;
            }
        }

        (out, bins, frames)
    }
}
