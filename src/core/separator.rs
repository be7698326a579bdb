use crate::{
    audio::{
        conform_channels, from_planar, read_audio, resample, to_planar, write_audio,
        write_audio_f32,
    },
    config::{SeparatorBackend, SeparatorConfig},
    core::{
        dsp::NormStats,
        engine::{separate_windowed, Engine, DEMUCS_SAMPLE_RATE, DEMUCS_T},
    },
    error::{ConvertError, Result},
    model::{model_manager::ensure_model, registry::resolve_manifest_url},
    paths::{models_cache_dir, stem_audio_name},
    types::{Stem, StemAudio},
};

use anyhow::Context;
use ndarray::{Array2, Array3, ArrayView2, Axis};
use std::{
    ffi::OsString,
    path::Path,
    process::{Command, Stdio},
};
use tempfile::tempdir;

/// A pretrained multi-source separation model.
pub trait SeparationModel {
    fn name(&self) -> &str;
    fn sample_rate(&self) -> u32;
    fn audio_channels(&self) -> u16;
    /// Source names, in the order `apply` returns them.
    fn sources(&self) -> &[String];
    /// `(channels, frames)` in, `(sources, channels, frames)` out.
    fn apply(&self, wave: &Array2<f32>) -> Result<Array3<f32>>;
}

/// A demucs-family ONNX model run in process.
pub struct OrtModel {
    name: String,
    engine: Engine,
    sources: Vec<String>,
    hop: usize,
}

impl OrtModel {
    /// A local model file, or the configured manifest's model fetched into
    /// the cache.
    pub fn from_config(cfg: &SeparatorConfig) -> Result<Self> {
        if let Some(path) = &cfg.model_path {
            let hop = cfg.hop.unwrap_or(DEMUCS_T);
            return Self::load(&cfg.model, path, cfg.sources.clone(), hop);
        }

        let url = resolve_manifest_url(cfg)?;
        let cache_dir = match &cfg.cache_dir {
            Some(dir) => dir.clone(),
            None => models_cache_dir()?,
        };
        let handle = ensure_model(&url, &cache_dir)?;
        let mf = handle.manifest;

        if mf.sample_rate != DEMUCS_SAMPLE_RATE {
            return Err(ConvertError::Manifest(format!(
                "model `{}` runs at {} Hz, expected {DEMUCS_SAMPLE_RATE}",
                mf.name, mf.sample_rate
            )));
        }
        if mf.window != DEMUCS_T {
            return Err(ConvertError::Manifest(format!(
                "model `{}` has window {}, expected {DEMUCS_T}",
                mf.name, mf.window
            )));
        }

        let sources = if mf.stems.is_empty() {
            cfg.sources.clone()
        } else {
            mf.stems
        };
        Self::load(&mf.name, &handle.local_path, sources, cfg.hop.unwrap_or(mf.hop))
    }

    pub fn load(name: &str, path: &Path, sources: Vec<String>, hop: usize) -> Result<Self> {
        if hop == 0 || hop > DEMUCS_T {
            return Err(ConvertError::Model(format!(
                "hop {hop} outside 1..={DEMUCS_T}"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            engine: Engine::load(path)?,
            sources,
            hop,
        })
    }
}

impl SeparationModel for OrtModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> u32 {
        DEMUCS_SAMPLE_RATE
    }

    fn audio_channels(&self) -> u16 {
        2
    }

    fn sources(&self) -> &[String] {
        &self.sources
    }

    fn apply(&self, wave: &Array2<f32>) -> Result<Array3<f32>> {
        separate_windowed(wave, DEMUCS_T, self.hop, |left, right| {
            self.engine.run_window(left, right)
        })
    }
}

/// The model selected by `cfg.backend`.
pub fn build_model(cfg: &SeparatorConfig) -> Result<Box<dyn SeparationModel>> {
    Ok(match cfg.backend {
        SeparatorBackend::Onnx => Box::new(OrtModel::from_config(cfg)?),
        SeparatorBackend::Command => Box::new(CommandModel::from_config(cfg)?),
    })
}

/// Separation delegated to an external runner, invoked as
/// `<program> [args...] --model <name> --input <wav> --output <dir>`.
///
/// The input is a normalized 32-bit float WAV. The runner must write
/// `<dir>/<source>.wav` for every configured source without renormalizing.
pub struct CommandModel {
    program: OsString,
    args: Vec<OsString>,
    model: String,
    sample_rate: u32,
    channels: u16,
    sources: Vec<String>,
}

impl CommandModel {
    pub fn from_config(cfg: &SeparatorConfig) -> Result<Self> {
        let program = cfg.program.as_deref().ok_or_else(|| {
            ConvertError::Separation("the command backend needs separator.program".into())
        })?;
        Ok(Self {
            program: program.into(),
            args: cfg.args.iter().map(OsString::from).collect(),
            model: cfg.model.clone(),
            sample_rate: cfg.sample_rate,
            channels: cfg.channels,
            sources: cfg.sources.clone(),
        })
    }
}

impl SeparationModel for CommandModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn audio_channels(&self) -> u16 {
        self.channels
    }

    fn sources(&self) -> &[String] {
        &self.sources
    }

    fn apply(&self, wave: &Array2<f32>) -> Result<Array3<f32>> {
        let scratch = tempdir()?;
        let input_wav = scratch.path().join("input.wav");
        let output_dir = scratch.path().join("sources");
        std::fs::create_dir_all(&output_dir)?;

        write_audio_f32(&input_wav, &from_planar(wave, self.sample_rate))?;

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg("--model")
            .arg(&self.model)
            .arg("--input")
            .arg(&input_wav)
            .arg("--output")
            .arg(&output_dir)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to run separation runner {:?}", self.program))?;

        if !output.status.success() {
            return Err(ConvertError::Separation(format!(
                "runner exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let (channels, frames) = wave.dim();
        let mut stems = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let path = output_dir.join(format!("{source}.wav"));
            let audio = read_audio(&path)
                .map_err(|e| ConvertError::Separation(format!("source `{source}`: {e}")))?;
            let planar = conform_channels(to_planar(&audio), channels as u16);
            stems.push(fit_frames(planar, frames));
        }

        let views: Vec<ArrayView2<f32>> = stems.iter().map(|s| s.view()).collect();
        Ok(ndarray::stack(Axis(0), &views)?)
    }
}

/// Truncate or zero-pad to exactly `frames` frames.
fn fit_frames(wave: Array2<f32>, frames: usize) -> Array2<f32> {
    let (ch, n) = wave.dim();
    if n == frames {
        return wave;
    }
    Array2::from_shape_fn((ch, frames), |(c, i)| if i < n { wave[(c, i)] } else { 0.0 })
}

/// Normalize with the mixdown statistics, apply the model, denormalize, and
/// pair each source with its stem.
pub fn separate_waveform<M>(model: &M, wave: &Array2<f32>) -> Result<Vec<(Stem, Array2<f32>)>>
where
    M: SeparationModel + ?Sized,
{
    let stats = NormStats::from_waveform(wave);
    let sources = model.apply(&stats.normalize(wave))?;

    let names = model.sources();
    if sources.shape()[0] != names.len() {
        return Err(ConvertError::Separation(format!(
            "model `{}` returned {} sources, expected {}",
            model.name(),
            sources.shape()[0],
            names.len()
        )));
    }

    let sources = stats.denormalize(sources);
    Ok(names
        .iter()
        .zip(sources.outer_iter())
        .map(|(name, source)| (Stem::from_name(name), source.to_owned()))
        .collect())
}

/// Load `input`, bring it to the model's rate and channel count, separate
/// it, and write one WAV per stem into `stems_dir`.
pub fn separate_stems<M>(model: &M, input: &Path, stems_dir: &Path) -> Result<Vec<StemAudio>>
where
    M: SeparationModel + ?Sized,
{
    let audio = read_audio(input)?;
    let wave = conform_channels(to_planar(&audio), model.audio_channels());
    let wave = resample(wave, audio.sample_rate, model.sample_rate())?;

    if wave.ncols() == 0 {
        return Err(ConvertError::Audio(format!("Empty audio: {}", input.display())));
    }

    tracing::info!(
        model = model.name(),
        frames = wave.ncols(),
        "separating {}",
        input.display()
    );

    let mut written = Vec::new();
    for (stem, source) in separate_waveform(model, &wave)? {
        let path = stems_dir.join(stem_audio_name(input, &stem));
        write_audio(&path, &from_planar(&source, model.sample_rate()))?;
        written.push(StemAudio { stem, path });
    }
    Ok(written)
}
