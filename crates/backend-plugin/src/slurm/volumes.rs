//! Materializes pod volumes under the pod directory and turns volume mounts
//! into `--bind` flags for the execution tool.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use api_types::RetrievedPodData;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::KeyToPath;
use k8s_openapi::api::core::v1::Secret;
use tracing::debug;
use tracing::warn;

use crate::error::BackendError;
use crate::error::BackendResult;

/// Host directory backing each named volume of a pod.
pub type VolumePaths = HashMap<String, PathBuf>;

/// Write ConfigMap and Secret contents and create emptyDir directories below
/// `pod_dir`. hostPath volumes map to their own path.
pub async fn prepare_volumes(pod_dir: &Path, data: &RetrievedPodData) -> BackendResult<VolumePaths> {
    let mut paths = VolumePaths::new();
    let volumes = data
        .pod
        .spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_ref());

    for volume in volumes.into_iter().flatten() {
        if let Some(source) = &volume.config_map {
            let name = source.name.clone().unwrap_or_default();
            let Some(config_map) = find_config_map(data, &name) else {
                if source.optional == Some(true) {
                    debug!(config_map = %name, "optional config map missing, skipping");
                    continue;
                }
                return Err(Report::new(BackendError::MissingDependency {
                    kind: "ConfigMap",
                    name,
                }));
            };

            let dir = pod_dir.join("configMaps").join(&volume.name);
            write_entries(&dir, config_map_entries(config_map), source.items.as_deref()).await?;
            paths.insert(volume.name.clone(), dir);
        } else if let Some(source) = &volume.secret {
            let name = source.secret_name.clone().unwrap_or_default();
            let Some(secret) = find_secret(data, &name) else {
                if source.optional == Some(true) {
                    debug!(secret = %name, "optional secret missing, skipping");
                    continue;
                }
                return Err(Report::new(BackendError::MissingDependency {
                    kind: "Secret",
                    name,
                }));
            };

            let dir = pod_dir.join("secrets").join(&volume.name);
            write_entries(&dir, secret_entries(secret), source.items.as_deref()).await?;
            paths.insert(volume.name.clone(), dir);
        } else if volume.empty_dir.is_some() {
            let dir = pod_dir.join("emptyDirs").join(&volume.name);
            tokio::fs::create_dir_all(&dir).await.change_context(io_error(&dir))?;
            paths.insert(volume.name.clone(), dir);
        } else if let Some(host_path) = &volume.host_path {
            paths.insert(volume.name.clone(), PathBuf::from(&host_path.path));
        } else {
            warn!(volume = %volume.name, "unsupported volume type, not mounted");
        }
    }

    Ok(paths)
}

/// `--bind host:container[:ro]` for every mount of the container whose volume
/// was materialized.
pub fn container_binds(container: &Container, paths: &VolumePaths) -> BackendResult<Vec<String>> {
    let mut flags = Vec::new();

    for mount in container.volume_mounts.iter().flatten() {
        let Some(host) = paths.get(&mount.name) else {
            warn!(container = %container.name, volume = %mount.name, "mount refers to unknown volume");
            continue;
        };
        let host = match mount.sub_path.as_deref().filter(|s| !s.is_empty()) {
            Some(sub_path) => host.join(checked_relative(sub_path)?),
            None => host.clone(),
        };

        let mut spec = format!("{}:{}", host.display(), mount.mount_path);
        if mount.read_only == Some(true) {
            spec.push_str(":ro");
        }
        flags.push("--bind".to_string());
        flags.push(spec);
    }

    Ok(flags)
}

fn find_config_map<'a>(data: &'a RetrievedPodData, name: &str) -> Option<&'a ConfigMap> {
    data.config_maps
        .iter()
        .chain(data.containers.iter().flat_map(|c| c.config_maps.iter()))
        .find(|cm| cm.metadata.name.as_deref() == Some(name))
}

fn find_secret<'a>(data: &'a RetrievedPodData, name: &str) -> Option<&'a Secret> {
    data.secrets
        .iter()
        .chain(data.containers.iter().flat_map(|c| c.secrets.iter()))
        .find(|s| s.metadata.name.as_deref() == Some(name))
}

fn config_map_entries(config_map: &ConfigMap) -> BTreeMap<String, Vec<u8>> {
    let mut entries = BTreeMap::new();
    for (key, value) in config_map.data.iter().flatten() {
        entries.insert(key.clone(), value.clone().into_bytes());
    }
    for (key, value) in config_map.binary_data.iter().flatten() {
        entries.insert(key.clone(), value.0.clone());
    }
    entries
}

fn secret_entries(secret: &Secret) -> BTreeMap<String, Vec<u8>> {
    let mut entries = BTreeMap::new();
    for (key, value) in secret.data.iter().flatten() {
        entries.insert(key.clone(), value.0.clone());
    }
    for (key, value) in secret.string_data.iter().flatten() {
        entries.insert(key.clone(), value.clone().into_bytes());
    }
    entries
}

/// Write each entry as a file in `dir`. With `items`, only the listed keys
/// are written, at their projected paths.
async fn write_entries(
    dir: &Path,
    entries: BTreeMap<String, Vec<u8>>,
    items: Option<&[KeyToPath]>,
) -> BackendResult<()> {
    tokio::fs::create_dir_all(dir).await.change_context(io_error(dir))?;

    let files: Vec<(String, &Vec<u8>)> = match items {
        Some(items) => items
            .iter()
            .filter_map(|item| entries.get(&item.key).map(|v| (item.path.clone(), v)))
            .collect(),
        None => entries.iter().map(|(k, v)| (k.clone(), v)).collect(),
    };

    for (relative, content) in files {
        let target = dir.join(checked_relative(&relative)?);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .change_context(io_error(parent))?;
        }
        tokio::fs::write(&target, content)
            .await
            .change_context(io_error(&target))?;
    }
    Ok(())
}

/// Reject paths that would escape their volume directory.
fn checked_relative(path: &str) -> BackendResult<&Path> {
    let candidate = Path::new(path);
    let escapes = candidate
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(Report::new(BackendError::Configuration {
            message: format!("path {path} escapes its volume"),
        }));
    }
    Ok(candidate)
}

fn io_error(path: &Path) -> BackendError {
    BackendError::Io {
        message: format!("failed to write {}", path.display()),
    }
}
