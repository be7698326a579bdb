use crate::{
    error::{ConvertError, Result},
    io::{
        crypto::verify_sha256,
        net::{download_with_progress, http_client},
    },
    types::ModelManifest,
};

use std::{
    fs,
    path::{Path, PathBuf},
};

pub struct ModelHandle {
    pub manifest: ModelManifest,
    pub local_path: PathBuf,
}

/// Fetch the manifest at `manifest_url` and make sure its model file sits in
/// `cache_dir` with the published checksum, downloading it when it does not.
pub fn ensure_model(manifest_url: &str, cache_dir: &Path) -> Result<ModelHandle> {
    let client = http_client()?;
    let manifest: ModelManifest = client
        .get(manifest_url)
        .send()?
        .error_for_status()?
        .json()?;

    let a = manifest
        .resolve_primary_artifact()
        .map_err(ConvertError::Manifest)?;

    fs::create_dir_all(cache_dir)?;
    let ext = a
        .file
        .rsplit_once('.')
        .map(|(_, ext)| format!(".{ext}"))
        .unwrap_or_default();
    let short_sha = a.sha256.get(..8).unwrap_or(&a.sha256);
    let local_path = cache_dir.join(format!("{}-{}{}", manifest.name, short_sha, ext));

    let need_download = !matches!(verify_sha256(&local_path, &a.sha256), Ok(true));
    if need_download {
        download_with_progress(&client, &a.url, &local_path)?;
        if !verify_sha256(&local_path, &a.sha256)? {
            return Err(ConvertError::Checksum { path: local_path });
        }
        if a.size_bytes > 0 {
            let size = fs::metadata(&local_path).map(|m| m.len()).unwrap_or(0);
            if size != a.size_bytes {
                tracing::warn!(
                    expected = a.size_bytes,
                    got = size,
                    "size mismatch for {}",
                    local_path.display()
                );
            }
        }
    } else {
        tracing::debug!("using cached model {}", local_path.display());
    }

    Ok(ModelHandle {
        manifest,
        local_path,
    })
}
