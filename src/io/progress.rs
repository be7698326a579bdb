use std::{
    path::Path,
    sync::{Mutex, OnceLock},
};

/// Steps of one stem-mode file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Separate,
    Transcribe,
    Combine,
}

#[derive(Debug)]
pub enum BatchProgress<'a> {
    Scanned { pending: usize, done: usize },
    FileStarted { index: usize, total: usize, input: &'a Path },
    Stage(Stage),
    /// Model download, in bytes. `total` is 0 when the server sends no length.
    Download { downloaded: u64, total: u64 },
    FileFinished { input: &'a Path, success: bool },
}

type ProgressCb = Box<dyn Fn(BatchProgress<'_>) + Send + 'static>;

static BATCH_PROGRESS_CB: OnceLock<Mutex<Option<ProgressCb>>> = OnceLock::new();

pub fn set_batch_progress_callback(cb: impl Fn(BatchProgress<'_>) + Send + 'static) {
    let slot = BATCH_PROGRESS_CB.get_or_init(|| Mutex::new(None));
    if let Ok(mut g) = slot.lock() {
        *g = Some(Box::new(cb));
    }
}

pub fn emit_batch_progress(progress: BatchProgress<'_>) {
    if let Some(m) = BATCH_PROGRESS_CB.get() {
        if let Ok(g) = m.lock() {
            if let Some(cb) = &*g {
                cb(progress);
            }
        }
    }
}
