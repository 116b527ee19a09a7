use std::sync::Arc;

use crate::error::StudioError;
use crate::models::GeneratedImage;
use crate::notifications::NotificationBus;
use crate::storage::KvStore;

pub const DEFAULT_HISTORY_KEY: &str = "generationHistory";

/// Newest-first list of generated images, mirrored into a [`KvStore`].
///
/// The in-memory list is authoritative. A failed write is reported on the
/// notification bus and the in-memory change stays in place.
pub struct HistoryStore {
  images: Vec<GeneratedImage>,
  kv: Arc<dyn KvStore>,
  key: String,
  bus: NotificationBus,
}

impl HistoryStore {
  pub fn empty(kv: Arc<dyn KvStore>, key: impl Into<String>, bus: NotificationBus) -> Self {
    Self {
      images: Vec::new(),
      kv,
      key: key.into(),
      bus,
    }
  }

  pub async fn load(kv: Arc<dyn KvStore>, key: impl Into<String>, bus: NotificationBus) -> Self {
    let mut store = Self::empty(kv, key, bus);
    match store.read_persisted().await {
      Ok(images) => {
        tracing::info!(count = images.len(), key = %store.key, "history loaded");
        store.images = images;
      }
      Err(err) => {
        tracing::warn!(key = %store.key, "failed to load history: {err}");
        store.bus.error("Could not load generation history.");
      }
    }
    store
  }

  async fn read_persisted(&self) -> Result<Vec<GeneratedImage>, StudioError> {
    let raw = self
      .kv
      .read(&self.key)
      .await
      .map_err(|e| StudioError::Persistence(e.to_string()))?;
    match raw {
      Some(raw) => serde_json::from_str(&raw).map_err(|e| StudioError::Persistence(e.to_string())),
      None => Ok(Vec::new()),
    }
  }

  pub fn images(&self) -> &[GeneratedImage] {
    &self.images
  }

  pub fn get(&self, id: &str) -> Option<&GeneratedImage> {
    self.images.iter().find(|img| img.id == id)
  }

  pub fn favorites(&self) -> impl Iterator<Item = &GeneratedImage> {
    self.images.iter().filter(|img| img.is_favorite)
  }

  pub fn len(&self) -> usize {
    self.images.len()
  }

  pub fn is_empty(&self) -> bool {
    self.images.is_empty()
  }

  /// Puts a new batch in front of the existing history. No deduplication.
  pub async fn merge(&mut self, new_images: Vec<GeneratedImage>) {
    if new_images.is_empty() {
      return;
    }
    let count = new_images.len();
    let mut merged = new_images;
    merged.append(&mut self.images);
    self.images = merged;
    tracing::debug!(count, total = self.images.len(), "merged batch into history");
    self.persist().await;
  }

  /// Flips the favorite flag and returns its new value, or `None` if the id
  /// is not in history.
  pub async fn toggle_favorite(&mut self, id: &str) -> Option<bool> {
    let image = self.images.iter_mut().find(|img| img.id == id)?;
    image.is_favorite = !image.is_favorite;
    let flag = image.is_favorite;
    self.persist().await;
    Some(flag)
  }

  pub async fn delete(&mut self, id: &str) -> bool {
    let Some(index) = self.images.iter().position(|img| img.id == id) else {
      return false;
    };
    self.images.remove(index);
    self.persist().await;
    self.bus.success("Image removed from history.");
    true
  }

  /// Writes the whole list. Returns whether the write went through.
  pub async fn persist(&self) -> bool {
    match self.write_all().await {
      Ok(()) => true,
      Err(err) => {
        tracing::error!(key = %self.key, "failed to save history: {err}");
        self.bus.error("Could not save generation history.");
        false
      }
    }
  }

  async fn write_all(&self) -> Result<(), StudioError> {
    let json = serde_json::to_string(&self.images).map_err(|e| StudioError::Persistence(e.to_string()))?;
    self
      .kv
      .write(&self.key, &json)
      .await
      .map_err(|e| StudioError::Persistence(e.to_string()))
  }
}
