use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::Engine;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::StudioError;
use crate::gemini::{ImageGenerator, PromptEnhancer};
use crate::history::HistoryStore;
use crate::models::{GeneratedImage, GenerationSettings, SettingsPatch, ViewTab, PROMPT_TEMPLATES};
use crate::notifications::NotificationBus;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GenerationPhase {
  #[default]
  Idle,
  Requesting,
}

struct StudioState {
  draft: GenerationSettings,
  results: Vec<GeneratedImage>,
  selected: Option<GeneratedImage>,
  active_tab: ViewTab,
  history: HistoryStore,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StudioSnapshot {
  pub settings: GenerationSettings,
  pub results: Vec<GeneratedImage>,
  pub generation: GenerationPhase,
  pub is_loading: bool,
  pub is_enhancing: bool,
  pub active_tab: ViewTab,
  pub selected: Option<GeneratedImage>,
  pub history_len: usize,
}

pub struct Download {
  pub bytes: Vec<u8>,
  pub mime: &'static str,
  pub file_name: String,
}

/// Marks an operation as in flight until dropped, so an abandoned call
/// still returns its phase to idle.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
  fn claim(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .ok()
      .map(|_| Self(flag))
  }
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

pub struct Studio {
  state: Mutex<StudioState>,
  generating: AtomicBool,
  enhancing: AtomicBool,
  generator: Arc<dyn ImageGenerator>,
  enhancer: Arc<dyn PromptEnhancer>,
  bus: NotificationBus,
}

impl Studio {
  pub fn new(
    draft: GenerationSettings,
    history: HistoryStore,
    generator: Arc<dyn ImageGenerator>,
    enhancer: Arc<dyn PromptEnhancer>,
    bus: NotificationBus,
  ) -> Self {
    Self {
      state: Mutex::new(StudioState {
        draft: draft.normalized(),
        results: Vec::new(),
        selected: None,
        active_tab: ViewTab::default(),
        history,
      }),
      generating: AtomicBool::new(false),
      enhancing: AtomicBool::new(false),
      generator,
      enhancer,
      bus,
    }
  }

  pub fn bus(&self) -> &NotificationBus {
    &self.bus
  }

  pub async fn snapshot(&self) -> StudioSnapshot {
    let state = self.state.lock().await;
    let is_loading = self.generating.load(Ordering::SeqCst);
    StudioSnapshot {
      settings: state.draft.clone(),
      results: state.results.clone(),
      generation: if is_loading {
        GenerationPhase::Requesting
      } else {
        GenerationPhase::Idle
      },
      is_loading,
      is_enhancing: self.enhancing.load(Ordering::SeqCst),
      active_tab: state.active_tab,
      selected: state.selected.clone(),
      history_len: state.history.len(),
    }
  }

  pub async fn settings(&self) -> GenerationSettings {
    self.state.lock().await.draft.clone()
  }

  pub async fn request_generation(&self) -> Result<Vec<GeneratedImage>, StudioError> {
    let (snapshot, in_flight) = {
      let mut state = self.state.lock().await;
      let in_flight = InFlight::claim(&self.generating).ok_or(StudioError::Busy("image generation"))?;
      if !state.draft.has_prompt() {
        self.bus.error("Please enter a prompt.");
        return Err(StudioError::Validation("prompt is empty".to_string()));
      }
      state.results.clear();
      (state.draft.clone(), in_flight)
    };

    tracing::info!(count = snapshot.num_images, style = snapshot.style_preset.id(), "generation started");
    let outcome = match self.generator.generate(&snapshot).await {
      Ok(payloads) if payloads.is_empty() => Err(StudioError::Generation("API returned no images.".to_string())),
      Ok(payloads) => Ok(payloads),
      Err(err) => Err(StudioError::Generation(format!("{err:#}"))),
    };

    let mut state = self.state.lock().await;
    drop(in_flight);
    match outcome {
      Ok(payloads) => {
        let created_at = Utc::now();
        let batch: Vec<GeneratedImage> = payloads
          .into_iter()
          .map(|base64| GeneratedImage::new(base64, &snapshot, created_at))
          .collect();
        tracing::info!(count = batch.len(), "generation succeeded");
        state.results = batch.clone();
        state.active_tab = ViewTab::Generate;
        state.history.merge(batch.clone()).await;
        Ok(batch)
      }
      Err(err) => {
        tracing::error!("{err}");
        self.bus.error("Image generation failed. Please try again.");
        Err(err)
      }
    }
  }

  pub async fn request_enhancement(&self) -> Result<String, StudioError> {
    let (prompt, in_flight) = {
      let state = self.state.lock().await;
      let in_flight = InFlight::claim(&self.enhancing).ok_or(StudioError::Busy("prompt enhancement"))?;
      if !state.draft.has_prompt() {
        self.bus.error("Please enter a prompt to enhance.");
        return Err(StudioError::Validation("prompt is empty".to_string()));
      }
      (state.draft.prompt.clone(), in_flight)
    };

    let outcome = match self.enhancer.enhance(&prompt).await {
      Ok(text) if text.trim().is_empty() => Err(StudioError::Enhancement("API returned no text.".to_string())),
      Ok(text) => Ok(text.trim().to_string()),
      Err(err) => Err(StudioError::Enhancement(format!("{err:#}"))),
    };

    let mut state = self.state.lock().await;
    drop(in_flight);
    match outcome {
      Ok(enhanced) => {
        state.draft = state.draft.clone().with_prompt(enhanced.clone());
        self.bus.success("Prompt enhanced successfully!");
        Ok(enhanced)
      }
      Err(err) => {
        tracing::error!("{err}");
        self.bus.error("Failed to enhance prompt.");
        Err(err)
      }
    }
  }

  /// Flips the favorite flag in history and mirrors it into the result set
  /// and the detail view. Ids that are not in history are ignored.
  pub async fn toggle_favorite(&self, id: &str) -> Option<bool> {
    let mut state = self.state.lock().await;
    let flag = state.history.toggle_favorite(id).await?;
    for image in state.results.iter_mut().filter(|img| img.id == id) {
      image.is_favorite = flag;
    }
    if let Some(selected) = state.selected.as_mut().filter(|img| img.id == id) {
      selected.is_favorite = flag;
    }
    Some(flag)
  }

  pub async fn delete_from_history(&self, id: &str) -> bool {
    self.state.lock().await.history.delete(id).await
  }

  /// Loads a past snapshot as the new draft and returns to the generate tab.
  pub async fn apply_settings_snapshot(&self, settings: GenerationSettings) -> GenerationSettings {
    let mut state = self.state.lock().await;
    state.draft = settings.normalized();
    state.active_tab = ViewTab::Generate;
    self.bus.info("Settings loaded. You can now generate a new image.");
    state.draft.clone()
  }

  pub async fn update_settings(&self, settings: GenerationSettings) -> GenerationSettings {
    let mut state = self.state.lock().await;
    state.draft = settings.normalized();
    state.draft.clone()
  }

  pub async fn patch_settings(&self, patch: SettingsPatch) -> GenerationSettings {
    let mut state = self.state.lock().await;
    state.draft = patch.apply(state.draft.clone());
    state.draft.clone()
  }

  pub async fn apply_template(&self, index: usize) -> Result<GenerationSettings, StudioError> {
    let template = PROMPT_TEMPLATES
      .get(index)
      .ok_or_else(|| StudioError::NotFound(format!("template {index}")))?;
    let mut state = self.state.lock().await;
    state.draft = state.draft.clone().with_prompt(*template);
    Ok(state.draft.clone())
  }

  pub async fn set_tab(&self, tab: ViewTab) {
    self.state.lock().await.active_tab = tab;
  }

  /// Images shown under a tab. Favorites keep history order.
  pub async fn view(&self, tab: ViewTab) -> Vec<GeneratedImage> {
    let state = self.state.lock().await;
    match tab {
      ViewTab::Generate => state.results.clone(),
      ViewTab::History => state.history.images().to_vec(),
      ViewTab::Favorites => state.history.favorites().cloned().collect(),
    }
  }

  pub async fn select_image(&self, id: &str) -> Result<GeneratedImage, StudioError> {
    let mut state = self.state.lock().await;
    let image = find_image(&state, id)
      .cloned()
      .ok_or_else(|| StudioError::NotFound(format!("image {id}")))?;
    state.selected = Some(image.clone());
    Ok(image)
  }

  pub async fn close_image(&self) {
    self.state.lock().await.selected = None;
  }

  pub async fn download(&self, id: &str) -> Result<Download, StudioError> {
    let state = self.state.lock().await;
    let image = find_image(&state, id).ok_or_else(|| StudioError::NotFound(format!("image {id}")))?;
    let bytes = base64::engine::general_purpose::STANDARD
      .decode(image.base64.as_bytes())
      .map_err(|e| StudioError::Validation(format!("image payload is not valid base64: {e}")))?;
    Ok(Download {
      bytes,
      mime: image.settings.output_format.mime(),
      file_name: image.file_name(),
    })
  }
}

fn find_image<'a>(state: &'a StudioState, id: &str) -> Option<&'a GeneratedImage> {
  state
    .results
    .iter()
    .find(|img| img.id == id)
    .or_else(|| state.history.get(id))
}
