//! Builds the plugin-facing create envelope from a provider create request.

use std::collections::BTreeSet;

use api_types::PodCreateRequest;
use api_types::RetrievedContainer;
use api_types::RetrievedPodData;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::Volume;

/// Convert a create request. With `export` set, each container also gets the
/// ConfigMaps, Secrets and emptyDir names reachable from its volume mounts.
pub fn retrieve_pod_data(request: PodCreateRequest, export: bool) -> RetrievedPodData {
    let containers = if export {
        export_containers(&request)
    } else {
        Vec::new()
    };

    let mut data = RetrievedPodData::from(request);
    data.containers = containers;
    data
}

fn export_containers(request: &PodCreateRequest) -> Vec<RetrievedContainer> {
    let Some(spec) = &request.pod.spec else {
        return Vec::new();
    };
    let volumes = spec.volumes.as_deref().unwrap_or_default();

    spec.init_containers
        .iter()
        .flatten()
        .chain(spec.containers.iter())
        .map(|container| export_container(request, volumes, container))
        .collect()
}

fn export_container(
    request: &PodCreateRequest,
    volumes: &[Volume],
    container: &Container,
) -> RetrievedContainer {
    let mounted: BTreeSet<&str> = container
        .volume_mounts
        .iter()
        .flatten()
        .map(|m| m.name.as_str())
        .collect();

    let mut exported = RetrievedContainer {
        name: container.name.clone(),
        ..Default::default()
    };

    for volume in volumes.iter().filter(|v| mounted.contains(v.name.as_str())) {
        if let Some(source) = &volume.config_map {
            let found = request
                .config_maps
                .iter()
                .find(|cm| cm.metadata.name == source.name);
            exported.config_maps.extend(found.cloned());
        } else if let Some(source) = &volume.secret {
            let found = request
                .secrets
                .iter()
                .find(|s| s.metadata.name == source.secret_name);
            exported.secrets.extend(found.cloned());
        } else if volume.empty_dir.is_some() {
            exported.empty_dirs.push(volume.name.clone());
        }
    }

    exported
}
