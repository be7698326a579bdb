use std::{fs::File, path::Path};

use anyhow::Context;
use hound::WavWriter;
use ndarray::Array2;
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, errors::Error as SymphoniaError,
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use symphonia::default::{get_codecs, get_probe};

use crate::error::{ConvertError, Result};
use crate::types::AudioData;

const RESAMPLE_MIN_CHUNK: usize = 1024;

pub fn read_audio<P: AsRef<Path>>(path: P) -> Result<AudioData> {
    let path: &Path = path.as_ref();

    let file: File =
        File::open(path).with_context(|| format!("Failed to open audio file: {:?}", path))?;

    let mss: MediaSourceStream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint: Hint = Hint::new();

    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;
    let track = format.default_track().context("No default track found")?;
    let track_id = track.id;

    let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate: u32 = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels: u16 = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    while let Ok(packet) = format.next_packet() {
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            // Corrupt frames are skipped, like every mp3 player does.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(e.into()),
        };
        sample_rate = decoded.spec().rate;
        channels = decoded.spec().channels.count() as u16;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);

        samples.extend_from_slice(buffer.samples());
    }

    if channels == 0 || sample_rate == 0 {
        return Err(ConvertError::Audio(format!(
            "No decodable audio in {}",
            path.display()
        )));
    }

    tracing::debug!(
        path = %path.display(),
        sample_rate,
        channels,
        samples = samples.len(),
        "read audio"
    );

    Ok(AudioData {
        samples,
        sample_rate,
        channels,
    })
}

/// 16-bit PCM, the format handed to the pitch tool.
pub fn write_audio<P: AsRef<Path>>(path: P, audio: &AudioData) -> Result<()> {
    let spec = hound::WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for sample in &audio.samples {
        let s = (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        writer.write_sample(s)?;
    }

    writer.finalize()?;
    Ok(())
}

/// 32-bit float, for normalized signals that leave the [-1, 1] range.
pub fn write_audio_f32<P: AsRef<Path>>(path: P, audio: &AudioData) -> Result<()> {
    let spec = hound::WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for sample in &audio.samples {
        writer.write_sample(*sample)?;
    }

    writer.finalize()?;
    Ok(())
}

/// Interleaved samples to a `(channels, frames)` array.
pub fn to_planar(audio: &AudioData) -> Array2<f32> {
    let ch = audio.channels.max(1) as usize;
    let frames = audio.samples.len() / ch;
    Array2::from_shape_fn((ch, frames), |(c, i)| audio.samples[i * ch + c])
}

pub fn from_planar(wave: &Array2<f32>, sample_rate: u32) -> AudioData {
    let (ch, frames) = wave.dim();
    let mut samples = Vec::with_capacity(ch * frames);
    for i in 0..frames {
        for c in 0..ch {
            samples.push(wave[(c, i)]);
        }
    }
    AudioData {
        samples,
        sample_rate,
        channels: ch as u16,
    }
}

/// Bring a waveform to `channels` channels: averaging down to mono,
/// duplicating up from mono, otherwise keeping the leading channels and
/// repeating the last one if more are needed.
pub fn conform_channels(wave: Array2<f32>, channels: u16) -> Array2<f32> {
    let target = channels.max(1) as usize;
    let (src, frames) = wave.dim();
    if src == target || src == 0 {
        return wave;
    }
    if target == 1 {
        return Array2::from_shape_fn((1, frames), |(_, i)| {
            wave.column(i).sum() / src as f32
        });
    }
    Array2::from_shape_fn((target, frames), |(c, i)| wave[(c.min(src - 1), i)])
}

/// Resample every channel from `from` Hz to `to` Hz.
///
/// The output is aligned with the input (the filter delay is removed) and
/// holds exactly `ceil(frames * to / from)` frames.
pub fn resample(wave: Array2<f32>, from: u32, to: u32) -> Result<Array2<f32>> {
    if from == to {
        return Ok(wave);
    }
    let (ch, frames) = wave.dim();
    if frames == 0 {
        return Ok(wave);
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to as f64 / from as f64;
    let chunk = frames.max(RESAMPLE_MIN_CHUNK);
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, chunk, ch)
        .map_err(|e| ConvertError::Audio(format!("Resampler error: {e}")))?;

    let delay = resampler.output_delay();
    let expected = (frames as f64 * ratio).ceil() as usize;

    let channel_data: Vec<Vec<f32>> = wave.outer_iter().map(|row| row.to_vec()).collect();
    let mut out = resampler
        .process_partial(Some(channel_data.as_slice()), None)
        .map_err(|e| ConvertError::Audio(format!("Resample failed: {e}")))?;

    // Flush the filter until the delayed tail is out.
    while out.first().map_or(0, Vec::len) < delay + expected {
        let tail = resampler
            .process_partial::<Vec<f32>>(None, None)
            .map_err(|e| ConvertError::Audio(format!("Resample failed: {e}")))?;
        if tail.first().map_or(true, Vec::is_empty) {
            break;
        }
        for (channel, rest) in out.iter_mut().zip(tail) {
            channel.extend(rest);
        }
    }

    let mut flat = Vec::with_capacity(ch * expected);
    for mut channel in out {
        channel.drain(..delay.min(channel.len()));
        channel.resize(expected, 0.0);
        flat.extend(channel);
    }
    Ok(Array2::from_shape_vec((ch, expected), flat)?)
}
