use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::media::{MediaId, MediaItem, Playlist};

/// Read-only source of playlists and their media metadata.
pub trait MediaCatalog: Send + Sync {
    fn playlist<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Playlist>>;
    fn list_items<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Vec<MediaItem>>>;
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct CatalogDocument {
    playlists: Vec<Playlist>,
    items: Vec<MediaItem>,
}

/// Catalog held in a single YAML or JSON document:
///
/// ```yaml
/// playlists:
///   - id: lobby
///     sequence: [a, b]
///     display_mode: auto_sort
/// items:
///   - { id: a, url: "http://gallery.local/a.jpg", width: 1920, height: 1080 }
/// ```
#[derive(Debug, Clone)]
pub struct FileCatalog {
    path: PathBuf,
    document: CatalogDocument,
}

impl FileCatalog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let text = std::fs::read_to_string(&path)?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let document: CatalogDocument = if is_json {
            serde_json::from_str(&text)?
        } else {
            serde_yaml::from_str(&text)?
        };
        debug!(
            path = %path.display(),
            playlists = document.playlists.len(),
            items = document.items.len(),
            "catalog file loaded"
        );
        Ok(Self { path, document })
    }

    fn find(&self, id: &str) -> Result<&Playlist> {
        self.document
            .playlists
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| {
                Error::Catalog(format!(
                    "playlist {id:?} not found in {}",
                    self.path.display()
                ))
            })
    }
}

impl MediaCatalog for FileCatalog {
    fn playlist<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Playlist>> {
        Box::pin(async move { self.find(id).cloned() })
    }

    fn list_items<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Vec<MediaItem>>> {
        Box::pin(async move {
            let playlist = self.find(id)?;
            Ok(self
                .document
                .items
                .iter()
                .filter(|item| playlist.sequence.contains(&item.id))
                .cloned()
                .collect())
        })
    }
}

/// JSON catalog served at `{base}/playlists/{id}` and `{base}/playlists/{id}/items`.
#[derive(Debug, Clone)]
pub struct HttpCatalog {
    base: String,
    client: reqwest::Client,
}

impl HttpCatalog {
    pub fn new(base: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base = base.into().trim_end_matches('/').to_string();
        Ok(Self { base, client })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| Error::Fetch {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url,
                status: status.as_u16(),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|source| Error::Fetch { url, source })
    }
}

impl MediaCatalog for HttpCatalog {
    fn playlist<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Playlist>> {
        Box::pin(self.get_json(format!("{}/playlists/{id}", self.base)))
    }

    fn list_items<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Vec<MediaItem>>> {
        Box::pin(self.get_json(format!("{}/playlists/{id}/items", self.base)))
    }
}

/// Order `items` by the playlist sequence, dropping ids the catalog does not know.
pub fn resolve_sequence(playlist: &Playlist, items: Vec<MediaItem>) -> Vec<MediaItem> {
    let by_id: HashMap<MediaId, MediaItem> =
        items.into_iter().map(|item| (item.id.clone(), item)).collect();
    playlist
        .sequence
        .iter()
        .filter_map(|id| {
            let found = by_id.get(id).cloned();
            if found.is_none() {
                warn!(playlist = %playlist.id, media = %id, "sequence references unknown media; skipping");
            }
            found
        })
        .collect()
}

/// Fetch a playlist and its items, resolved into display order.
pub async fn load_sequence(
    catalog: &dyn MediaCatalog,
    playlist_id: &str,
) -> Result<(Playlist, Vec<MediaItem>)> {
    let playlist = catalog.playlist(playlist_id).await?;
    let items = catalog.list_items(playlist_id).await?;
    let sequence = resolve_sequence(&playlist, items);
    debug!(
        playlist = %playlist.id,
        requested = playlist.sequence.len(),
        resolved = sequence.len(),
        "playlist resolved"
    );
    Ok((playlist, sequence))
}
