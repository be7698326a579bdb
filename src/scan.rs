use crate::{
    error::{ConvertError, Result},
    paths::{basic_output_path, stem_output_path},
    types::Stem,
};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Inputs split by whether their expected outputs already exist.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scan {
    pub pending: Vec<PathBuf>,
    pub done: Vec<PathBuf>,
}

/// Files directly inside `dir` whose extension matches one of `extensions`
/// (case-insensitive), sorted by path.
pub fn find_inputs(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|source| ConvertError::InputDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut inputs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ConvertError::InputDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)));
        if matches {
            inputs.push(path);
        }
    }
    inputs.sort();
    Ok(inputs)
}

/// An input is pending when at least one of its expected outputs is missing.
/// Existing outputs are never checked for staleness.
pub fn pending_inputs<F>(inputs: Vec<PathBuf>, expected_outputs: F) -> Scan
where
    F: Fn(&Path) -> Vec<PathBuf>,
{
    let mut scan = Scan::default();
    for input in inputs {
        if expected_outputs(&input).iter().all(|p| p.exists()) {
            scan.done.push(input);
        } else {
            scan.pending.push(input);
        }
    }
    scan
}

pub fn basic_outputs(out_dir: &Path, input: &Path) -> Vec<PathBuf> {
    vec![basic_output_path(out_dir, input)]
}

/// The four stem transcriptions. The combined file is not a completion marker.
pub fn stem_outputs(out_dir: &Path, input: &Path) -> Vec<PathBuf> {
    Stem::ALL
        .iter()
        .map(|stem| stem_output_path(out_dir, input, stem))
        .collect()
}
