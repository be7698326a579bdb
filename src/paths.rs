use crate::{
    error::{ConvertError, Result},
    types::Stem,
};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

const TOOL_SUFFIX: &str = "basic_pitch";

/// File stem of an input, used as the base of every output name.
pub fn input_stem(input: &Path) -> &str {
    input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
}

pub fn basic_output_path(out_dir: &Path, input: &Path) -> PathBuf {
    out_dir.join(format!("{}_{TOOL_SUFFIX}.mid", input_stem(input)))
}

pub fn stem_output_path(out_dir: &Path, input: &Path, stem: &Stem) -> PathBuf {
    out_dir.join(format!(
        "{}_{}_{TOOL_SUFFIX}.mid",
        input_stem(input),
        stem.name()
    ))
}

pub fn combined_output_path(out_dir: &Path, input: &Path) -> PathBuf {
    out_dir.join(format!("{}_combined.mid", input_stem(input)))
}

/// Name of the temporary stem WAV. The pitch tool names its MIDI after the
/// audio basename, so this lands its output on [`stem_output_path`].
pub fn stem_audio_name(input: &Path, stem: &Stem) -> String {
    format!("{}_{}.wav", input_stem(input), stem.name())
}

/// MIDI path the pitch tool writes for `audio` inside `out_dir`.
pub fn tool_output_path(out_dir: &Path, audio: &Path) -> PathBuf {
    basic_output_path(out_dir, audio)
}

/// Where downloaded separation models are kept between runs.
pub fn models_cache_dir() -> Result<PathBuf> {
    let proj = ProjectDirs::from("dev", "StemToMidi", "stem-to-midi")
        .ok_or(ConvertError::CacheDirUnavailable)?;
    Ok(proj.cache_dir().join("models"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_audio_name_maps_to_stem_output() {
        let out = Path::new("out");
        let input = Path::new("data/song.mp3");
        let audio = Path::new("/tmp/x").join(stem_audio_name(input, &Stem::Vocals));
        assert_eq!(
            tool_output_path(out, &audio),
            stem_output_path(out, input, &Stem::Vocals)
        );
    }

    #[test]
    fn falls_back_when_no_stem() {
        assert_eq!(input_stem(Path::new("")), "output");
    }
}
