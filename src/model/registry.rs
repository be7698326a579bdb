use crate::{
    config::SeparatorConfig,
    error::{ConvertError, Result},
};

/// Manifest URL for the configured model: `manifest_url` when set,
/// otherwise the `[separator.models]` entry named by `model`.
pub fn resolve_manifest_url(cfg: &SeparatorConfig) -> Result<String> {
    if let Some(url) = &cfg.manifest_url {
        return Ok(url.clone());
    }
    cfg.models.get(&cfg.model).cloned().ok_or_else(|| {
        ConvertError::Model(format!(
            "Model `{}` not found in registry; set separator.manifest_url, add it under \
             [separator.models] or point separator.model_path at a local .onnx file",
            cfg.model
        ))
    })
}
