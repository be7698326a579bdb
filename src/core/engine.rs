//! ONNX Runtime inference for hybrid demucs exports.
//!
//! The exported graph takes a fixed window of stereo audio twice, once as a
//! `[1, 2, T]` waveform and once as a `[1, 4, F, Frames]` complex-as-channels
//! spectrogram, and returns the time-domain sources as `[1, S, 2, T]`.

use crate::{
    core::dsp::Stft,
    error::{ConvertError, Result},
};

use ndarray::{s, Array2, Array3};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::{Tensor, Value},
};
use std::{fmt::Display, path::Path, sync::Mutex};

pub const DEMUCS_SAMPLE_RATE: u32 = 44_100;
pub const DEMUCS_T: usize = 343_980;
const DEMUCS_F: usize = 2048;
const DEMUCS_FRAMES: usize = 336;
const DEMUCS_NFFT: usize = 4096;
const DEMUCS_HOP: usize = 1024;

fn model_err(e: impl Display) -> ConvertError {
    ConvertError::Model(e.to_string())
}

pub struct Engine {
    session: Mutex<Session>,
    stft: Stft,
}

impl Engine {
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!("loading separation model {}", path.display());
        let session = Session::builder()
            .map_err(model_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(model_err)?
            .commit_from_file(path)
            .map_err(|e| ConvertError::Model(format!("{}: {e}", path.display())))?;

        Ok(Self {
            session: Mutex::new(session),
            stft: Stft::new(DEMUCS_NFFT, DEMUCS_HOP),
        })
    }

    /// Separate one `DEMUCS_T`-frame window into `(sources, 2, DEMUCS_T)`.
    pub fn run_window(&self, left: &[f32], right: &[f32]) -> Result<Array3<f32>> {
        check_window(left, right)?;
        let t = left.len();

        let mut planar = Vec::with_capacity(2 * t);
        planar.extend_from_slice(left);
        planar.extend_from_slice(right);
        let time_value: Value = Tensor::from_array((vec![1, 2, t], planar))
            .map_err(model_err)?
            .into_dyn();

        let (spec_cac, f_bins, frames) = self.stft.spectrogram_cac(left, right);
        if f_bins != DEMUCS_F || frames != DEMUCS_FRAMES {
            return Err(ConvertError::Model(format!(
                "Spec dims mismatch: got F={f_bins},Frames={frames}, expected F={DEMUCS_F},Frames={DEMUCS_FRAMES}"
            )));
        }
        let spec_value: Value = Tensor::from_array((vec![1, 4, f_bins, frames], spec_cac))
            .map_err(model_err)?
            .into_dyn();

        let mut session = self
            .session
            .lock()
            .map_err(|_| ConvertError::Model("session lock poisoned".into()))?;

        // Exports name the waveform `input` (or `mix`); the other input is the spectrogram.
        let names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let in_time = names
            .iter()
            .find(|n| n.as_str() == "input" || n.as_str() == "mix")
            .or_else(|| names.first())
            .cloned()
            .ok_or_else(|| ConvertError::Model("Model has no inputs".into()))?;
        let in_spec = names
            .iter()
            .find(|n| **n != in_time)
            .cloned()
            .ok_or_else(|| ConvertError::Model("Model missing spectrogram input".into()))?;

        let outputs = session
            .run(vec![(in_time, time_value), (in_spec, spec_value)])
            .map_err(model_err)?;

        // The time-domain sources are the only [1, S, 2, T] output.
        for (name, value) in outputs {
            let Ok((shape, data)) = value.try_extract_tensor::<f32>() else {
                continue;
            };
            if shape.len() == 4 && shape[0] == 1 && shape[2] == 2 && shape[3] as usize == t {
                let sources = shape[1] as usize;
                return Ok(Array3::from_shape_vec((sources, 2, t), data.to_vec())?);
            }
            tracing::trace!(output = %name, "skipping model output");
        }

        Err(ConvertError::Model(format!(
            "Model returned no [1, S, 2, {t}] output"
        )))
    }
}

/// Reject windows the exported graph cannot take.
pub fn check_window(left: &[f32], right: &[f32]) -> Result<()> {
    if left.len() != right.len() {
        return Err(ConvertError::Model(format!(
            "L/R length mismatch: {} vs {}",
            left.len(),
            right.len()
        )));
    }
    if left.len() != DEMUCS_T {
        return Err(ConvertError::Model(format!(
            "Bad window length {} (expected {DEMUCS_T})",
            left.len()
        )));
    }
    Ok(())
}

/// Run `run` over `window`-frame slices of a stereo `(2, frames)` waveform,
/// one every `hop` frames, and stitch the results into `(sources, 2, frames)`.
///
/// The last window is zero-padded. Where windows overlap the later one wins.
pub fn separate_windowed<F>(
    wave: &Array2<f32>,
    window: usize,
    hop: usize,
    mut run: F,
) -> Result<Array3<f32>>
where
    F: FnMut(&[f32], &[f32]) -> Result<Array3<f32>>,
{
    if !(window > 0 && hop > 0 && hop <= window) {
        return Err(ConvertError::Model(format!(
            "Bad window/hop: {window}/{hop}"
        )));
    }
    let (channels, n) = wave.dim();
    if channels != 2 {
        return Err(ConvertError::Model(format!(
            "Expected stereo input, got {channels} channel(s)"
        )));
    }
    if n == 0 {
        return Err(ConvertError::Audio("Empty audio".into()));
    }

    let mut left = vec![0f32; window];
    let mut right = vec![0f32; window];
    let mut stems: Option<Array3<f32>> = None;
    let mut pos = 0usize;

    loop {
        for i in 0..window {
            let idx = pos + i;
            let inside = idx < n;
            left[i] = if inside { wave[(0, idx)] } else { 0.0 };
            right[i] = if inside { wave[(1, idx)] } else { 0.0 };
        }

        let out = run(&left, &right)?;
        let (sources, out_channels, t_out) = out.dim();
        if out_channels != 2 {
            return Err(ConvertError::Model(format!(
                "Window output has {out_channels} channel(s)"
            )));
        }

        let acc = stems.get_or_insert_with(|| Array3::zeros((sources, 2, n)));
        if acc.shape()[0] != sources {
            return Err(ConvertError::Model(format!(
                "Window returned {sources} sources, earlier windows {}",
                acc.shape()[0]
            )));
        }

        let copy_len = t_out.min(window).min(n - pos);
        acc.slice_mut(s![.., .., pos..pos + copy_len])
            .assign(&out.slice(s![.., .., ..copy_len]));

        if pos + hop >= n {
            break;
        }
        pos += hop;
    }

    stems.ok_or_else(|| ConvertError::Model("No windows were processed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_len_mismatch() {
        let left = vec![0.0f32; 1000];
        let right = vec![0.0f32; 999];
        assert!(check_window(&left, &right).is_err());
    }

    #[test]
    fn rejects_wrong_t() {
        let left = vec![0.0f32; 1024];
        let right = vec![0.0f32; 1024];
        let err = check_window(&left, &right).unwrap_err();
        assert!(err.to_string().contains("343980"));
    }

    #[test]
    fn accepts_demucs_window() {
        let w = vec![0.0f32; DEMUCS_T];
        check_window(&w, &w).unwrap();
    }

    /// Two sources: the left channel and the right channel, each on both
    /// output channels.
    fn split_channels(left: &[f32], right: &[f32]) -> Result<Array3<f32>> {
        let t = left.len();
        Ok(Array3::from_shape_fn((2, 2, t), |(s, _, i)| {
            if s == 0 {
                left[i]
            } else {
                right[i]
            }
        }))
    }

    #[test]
    fn windows_cover_the_whole_input() {
        let wave = Array2::from_shape_fn((2, 10), |(c, i)| if c == 0 { i as f32 } else { -(i as f32) });
        let mut calls = 0;
        let out = separate_windowed(&wave, 4, 4, |l, r| {
            calls += 1;
            split_channels(l, r)
        })
        .unwrap();

        assert_eq!(calls, 3);
        assert_eq!(out.dim(), (2, 2, 10));
        for i in 0..10 {
            assert_eq!(out[(0, 1, i)], i as f32);
            assert_eq!(out[(1, 0, i)], -(i as f32));
        }
    }

    #[test]
    fn overlapping_windows_let_the_later_one_win() {
        let wave = Array2::from_elem((2, 6), 1.0f32);
        let mut call = 0.0;
        let out = separate_windowed(&wave, 4, 2, |l, r| {
            call += 1.0;
            Ok(split_channels(l, r)?.mapv(|x| x * call))
        })
        .unwrap();

        let got: Vec<f32> = (0..6).map(|i| out[(0, 0, i)]).collect();
        assert_eq!(got, vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn mono_input_is_rejected() {
        let wave = Array2::zeros((1, 8));
        assert!(separate_windowed(&wave, 4, 4, split_channels).is_err());
    }

    #[test]
    fn bad_hop_is_rejected() {
        let wave = Array2::zeros((2, 8));
        assert!(separate_windowed(&wave, 4, 5, split_channels).is_err());
        assert!(separate_windowed(&wave, 4, 0, split_channels).is_err());
    }

    #[test]
    fn garbage_model_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.onnx");
        std::fs::write(&path, b"not a protobuf").unwrap();
        let err = Engine::load(&path).err().expect("garbage should not load");
        assert!(err.to_string().contains("broken.onnx"));
    }
}
