use crate::model::{DiscoveredOverlay, Discovery, MalformedOverlay, Overlay};

use pipeline_core::{Config, Error, Result};

use futures::{stream, StreamExt};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Names Kustomize accepts for the definition document, in lookup order.
pub static DEFINITION_FILES: [&str; 3] = ["kustomization.yaml", "kustomization.yml", "Kustomization"];

/// Lists `overlays/*` under the configured root and parses each definition.
///
/// A broken overlay becomes a `Malformed` entry in its own slot; only a
/// missing or unreadable `overlays/` directory fails the whole call.
pub async fn discover(config: &Config) -> Result<Discovery> {
    let overlays_path = config.overlays_path();
    let names = overlay_names(&overlays_path).await?;
    info!("Discovered {} overlay(s) in {}", names.len(), overlays_path.display());

    let entries = stream::iter(names)
        .map(|name| load_overlay(config, name))
        .buffered(config.concurrency)
        .collect::<Vec<_>>()
        .await;

    Ok(Discovery {
        root: config.root.clone(),
        entries,
    })
}

async fn overlay_names(overlays_path: &Path) -> Result<Vec<String>> {
    let mut dir = match tokio::fs::read_dir(overlays_path).await {
        Ok(dir) => dir,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(Error::OverlaysDirMissing(overlays_path.to_path_buf()));
        }
        Err(err) => return Err(Error::io(overlays_path, err)),
    };

    let mut names = Vec::new();
    while let Some(entry) = dir.next_entry().await.map_err(|err| Error::io(overlays_path, err))? {
        let Ok(name) = entry.file_name().into_string() else {
            warn!("Skipping overlay with a non UTF-8 name in {}", overlays_path.display());
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        // follows symlinks, so linked overlay directories count
        match tokio::fs::metadata(entry.path()).await {
            Ok(metadata) if metadata.is_dir() => names.push(name),
            Ok(_) => debug!("Ignoring {} in {}: not a directory", name, overlays_path.display()),
            Err(err) => warn!("Skipping {}: {}", entry.path().display(), err),
        }
    }

    names.sort();
    Ok(names)
}

async fn find_definition(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    for file in DEFINITION_FILES {
        let path = dir.join(file);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => return Ok(Some(path)),
            Ok(_) => continue,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(None)
}

async fn load_overlay(config: &Config, name: String) -> DiscoveredOverlay {
    let dir = config.overlay_path(&name);
    let malformed = |path: PathBuf, reason: String| {
        warn!("Overlay {} is malformed: {}", name, reason);
        DiscoveredOverlay::Malformed(MalformedOverlay {
            name: name.clone(),
            path,
            reason,
        })
    };

    let path = match find_definition(&dir).await {
        Ok(Some(path)) => path,
        Ok(None) => return malformed(dir.join(DEFINITION_FILES[0]), "no kustomization.yaml found".into()),
        Err(err) => return malformed(dir, err.to_string()),
    };

    let source = match tokio::fs::read_to_string(&path).await {
        Ok(source) => source,
        Err(err) => return malformed(path, format!("cannot read definition: {err}")),
    };

    match Overlay::parse(&name, &path, source, config) {
        Ok(overlay) => {
            debug!(
                "Overlay {}: image tag {:?}, version label {:?}",
                name, overlay.image_tag, overlay.version_label
            );
            DiscoveredOverlay::Found(overlay)
        }
        Err(reason) => malformed(path, reason),
    }
}
