use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::history::DEFAULT_HISTORY_KEY;
use crate::models::GenerationSettings;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppConfig {
  pub listen_addr: String,
  pub api_base_url: String,
  pub image_model: String,
  pub text_model: String,
  pub history_key: String,
  pub notification_ttl_ms: u64,
  pub default_settings: GenerationSettings,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      listen_addr: "127.0.0.1:8787".to_string(),
      api_base_url: "https://generativelanguage.googleapis.com".to_string(),
      image_model: "imagen-4.0-generate-001".to_string(),
      text_model: "gemini-2.5-flash".to_string(),
      history_key: DEFAULT_HISTORY_KEY.to_string(),
      notification_ttl_ms: 5000,
      default_settings: GenerationSettings::default(),
    }
  }
}

impl AppConfig {
  /// Listen address, history key, notification lifetime and default draft are
  /// read once at startup. Changing any of them takes effect after a restart.
  pub fn needs_restart(&self, next: &AppConfig) -> bool {
    self.listen_addr != next.listen_addr
      || self.history_key != next.history_key
      || self.notification_ttl_ms != next.notification_ttl_ms
      || self.default_settings != next.default_settings
  }

  pub fn notification_lifetime(&self) -> Duration {
    Duration::from_millis(self.notification_ttl_ms)
  }
}

pub fn load_or_init(path: &Path) -> anyhow::Result<AppConfig> {
  if path.exists() {
    let data = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&data)?;
    Ok(config)
  } else {
    let config = AppConfig::default();
    save_config(path, &config)?;
    Ok(config)
  }
}

pub fn save_config(path: &Path, config: &AppConfig) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(config)?;
  std::fs::write(path, json)?;
  Ok(())
}
