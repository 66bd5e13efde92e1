//! Parameter persistence.
//!
//! A checkpoint is two files: the safetensors parameter set at `path` and a
//! JSON sidecar at `<path>.json` recording the [`ModelSpec`] it was built
//! from. Loading is strict. The recorded spec must equal the expected one,
//! every stored name must exist in the network with the same shape and
//! element kind, and every network parameter must be present in the file.

use std::collections::{BTreeSet, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tch::{nn, Tensor};

use super::ModelSpec;
use crate::error::{FallError, Result};

pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub format_version: u32,
    pub spec: ModelSpec,
}

/// `weights.safetensors` -> `weights.safetensors.json`
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".json");
    PathBuf::from(name)
}

pub(crate) fn save(vs: &nn::VarStore, spec: &ModelSpec, path: &Path) -> Result<()> {
    let mut named: Vec<(String, Tensor)> = vs.variables().into_iter().collect();
    named.sort_by(|a, b| a.0.cmp(&b.0));
    Tensor::write_safetensors(&named, path)?;

    let meta = CheckpointMeta {
        format_version: CHECKPOINT_FORMAT_VERSION,
        spec: spec.clone(),
    };
    std::fs::write(sidecar_path(path), serde_json::to_vec_pretty(&meta)?)?;

    tracing::debug!(path = %path.display(), tensors = named.len(), "checkpoint written");
    Ok(())
}

fn ensure_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("checkpoint {} not found", path.display()),
        )
        .into());
    }
    Ok(())
}

pub(crate) fn read_meta(path: &Path) -> Result<CheckpointMeta> {
    ensure_exists(path)?;
    let sidecar = sidecar_path(path);
    let content = match std::fs::read(&sidecar) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FallError::incompatible(
                path,
                format!("metadata file {} is missing", sidecar.display()),
            ))
        }
        Err(e) => return Err(e.into()),
    };
    let meta: CheckpointMeta = serde_json::from_slice(&content)
        .map_err(|e| FallError::incompatible(path, format!("unreadable metadata: {e}")))?;
    if meta.format_version != CHECKPOINT_FORMAT_VERSION {
        return Err(FallError::incompatible(
            path,
            format!(
                "format version {} (supported: {CHECKPOINT_FORMAT_VERSION})",
                meta.format_version
            ),
        ));
    }
    Ok(meta)
}

/// Copies every stored tensor into `vs`, refusing partial or reshaped sets.
pub(crate) fn load_strict(vs: &nn::VarStore, path: &Path) -> Result<()> {
    ensure_exists(path)?;
    let stored: HashMap<String, Tensor> = Tensor::read_safetensors(path)
        .map_err(|e| FallError::incompatible(path, format!("unreadable parameters: {e}")))?
        .into_iter()
        .collect();
    let targets = vs.variables();

    let stored_names: BTreeSet<&String> = stored.keys().collect();
    let target_names: BTreeSet<&String> = targets.keys().collect();
    if let Some(missing) = target_names.difference(&stored_names).next() {
        return Err(FallError::incompatible(
            path,
            format!("parameter `{missing}` is missing"),
        ));
    }
    if let Some(unexpected) = stored_names.difference(&target_names).next() {
        return Err(FallError::incompatible(
            path,
            format!("unexpected parameter `{unexpected}`"),
        ));
    }

    for (name, target) in &targets {
        let source = &stored[name];
        if source.size() != target.size() {
            return Err(FallError::incompatible(
                path,
                format!(
                    "parameter `{name}` has shape {:?}, network expects {:?}",
                    source.size(),
                    target.size()
                ),
            ));
        }
        if source.kind() != target.kind() {
            return Err(FallError::incompatible(
                path,
                format!(
                    "parameter `{name}` has kind {:?}, network expects {:?}",
                    source.kind(),
                    target.kind()
                ),
            ));
        }
    }

    tch::no_grad(|| -> Result<()> {
        for (name, target) in &targets {
            let mut target = target.shallow_clone();
            target.f_copy_(&stored[name].to_device(target.device()))?;
        }
        Ok(())
    })?;

    tracing::debug!(path = %path.display(), tensors = targets.len(), "checkpoint loaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_path_appends_suffix() {
        assert_eq!(
            sidecar_path(Path::new("out/fall.safetensors")),
            PathBuf::from("out/fall.safetensors.json")
        );
    }

    #[test]
    fn test_missing_sidecar_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        std::fs::write(&path, b"").unwrap();
        let err = read_meta(&path).unwrap_err();
        assert!(matches!(err, FallError::CheckpointIncompatible { .. }));
    }

    #[test]
    fn test_future_format_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        std::fs::write(&path, b"").unwrap();
        let meta = serde_json::json!({
            "format_version": 99,
            "spec": ModelSpec::default(),
        });
        std::fs::write(sidecar_path(&path), meta.to_string()).unwrap();
        let err = read_meta(&path).unwrap_err();
        assert!(err.to_string().contains("format version 99"));
    }

    #[test]
    fn test_missing_parameters_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_meta(&dir.path().join("absent.safetensors")).unwrap_err();
        assert!(matches!(err, FallError::Io(_)));
    }
}
