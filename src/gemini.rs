use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::models::GenerationSettings;

const KEYRING_SERVICE: &str = "AetherLens";
const KEYRING_USER: &str = "gemini";
const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Produces encoded images for a settings snapshot.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
  async fn generate(&self, settings: &GenerationSettings) -> anyhow::Result<Vec<String>>;
}

/// Rewrites a prompt into a more descriptive one.
#[async_trait]
pub trait PromptEnhancer: Send + Sync {
  async fn enhance(&self, prompt: &str) -> anyhow::Result<String>;
}

pub fn set_api_key(key: &str) -> anyhow::Result<()> {
  let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
  entry.set_password(key)?;
  Ok(())
}

pub fn has_api_key() -> bool {
  api_key().is_ok()
}

fn api_key() -> anyhow::Result<String> {
  if let Ok(key) = std::env::var(API_KEY_ENV) {
    if !key.trim().is_empty() {
      return Ok(key.trim().to_string());
    }
  }
  let key = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)
    .and_then(|e| e.get_password())
    .map_err(|_| anyhow::anyhow!("Gemini API key missing. Set it in Settings."))?;
  if key.trim().is_empty() {
    anyhow::bail!("Gemini API key missing. Set it in Settings.");
  }
  Ok(key)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictRequest {
  instances: Vec<PredictInstance>,
  parameters: PredictParameters,
}

#[derive(Serialize)]
struct PredictInstance {
  prompt: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictParameters {
  sample_count: u8,
  aspect_ratio: &'static str,
  output_options: OutputOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutputOptions {
  mime_type: &'static str,
}

#[derive(Deserialize, Default)]
struct PredictResponse {
  #[serde(default)]
  predictions: Vec<Prediction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
  bytes_base64_encoded: Option<String>,
}

fn full_prompt(settings: &GenerationSettings) -> String {
  format!("{}, {} style", settings.prompt, settings.style_preset.id())
}

fn predict_request(settings: &GenerationSettings) -> PredictRequest {
  PredictRequest {
    instances: vec![PredictInstance {
      prompt: full_prompt(settings),
    }],
    parameters: PredictParameters {
      sample_count: settings.num_images,
      aspect_ratio: settings.aspect_ratio.token(),
      output_options: OutputOptions {
        mime_type: settings.output_format.mime(),
      },
    },
  }
}

fn images_from(response: PredictResponse) -> anyhow::Result<Vec<String>> {
  let images: Vec<String> = response
    .predictions
    .into_iter()
    .filter_map(|p| p.bytes_base64_encoded)
    .filter(|b| !b.is_empty())
    .collect();
  if images.is_empty() {
    anyhow::bail!("API returned no images.");
  }
  Ok(images)
}

fn enhancement_instruction(prompt: &str) -> String {
  format!(
    "You are a creative assistant for an AI image generator. Your task is to take a user's prompt and enhance it to be more descriptive, vivid, and suitable for generating a high-quality, detailed image. Do not reply with conversational text, just output the enhanced prompt.\nUser prompt: \"{prompt}\"\nEnhanced prompt:"
  )
}

fn generate_content_request(prompt: &str) -> serde_json::Value {
  serde_json::json!({
    "contents": [{ "parts": [{ "text": enhancement_instruction(prompt) }] }],
    "generationConfig": { "thinkingConfig": { "thinkingBudget": 0 } }
  })
}

fn text_from(body: &serde_json::Value) -> anyhow::Result<String> {
  let text: String = body["candidates"][0]["content"]["parts"]
    .as_array()
    .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
    .unwrap_or_default();
  let text = text.trim();
  if text.is_empty() {
    anyhow::bail!("API returned no text for prompt enhancement.");
  }
  Ok(text.to_string())
}

/// Talks to the Gemini REST API. Model names are read from the shared config
/// on every call.
pub struct GeminiClient {
  http: reqwest::Client,
  config: Arc<RwLock<AppConfig>>,
}

impl GeminiClient {
  pub fn new(config: Arc<RwLock<AppConfig>>) -> Self {
    Self {
      http: reqwest::Client::new(),
      config,
    }
  }

  async fn post(&self, model: &str, method: &str, body: &impl Serialize) -> anyhow::Result<serde_json::Value> {
    let base = self.config.read().await.api_base_url.clone();
    let url = format!("{}/v1beta/models/{}:{}", base.trim_end_matches('/'), model, method);
    let key = api_key()?;

    let mut headers = HeaderMap::new();
    headers.insert("x-goog-api-key", HeaderValue::from_str(&key)?);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let resp = self
      .http
      .post(&url)
      .headers(headers)
      .json(body)
      .send()
      .await
      .with_context(|| format!("request to {model} failed"))?;

    if !resp.status().is_success() {
      let status = resp.status();
      let text = resp
        .text()
        .await
        .unwrap_or_else(|_| "Gemini request failed.".to_string());
      anyhow::bail!("Gemini error ({status}): {text}");
    }

    Ok(resp.json::<serde_json::Value>().await?)
  }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
  async fn generate(&self, settings: &GenerationSettings) -> anyhow::Result<Vec<String>> {
    let model = self.config.read().await.image_model.clone();
    tracing::info!(%model, count = settings.num_images, "requesting images");
    let body = self.post(&model, "predict", &predict_request(settings)).await?;
    let response: PredictResponse = serde_json::from_value(body)?;
    images_from(response)
  }
}

#[async_trait]
impl PromptEnhancer for GeminiClient {
  async fn enhance(&self, prompt: &str) -> anyhow::Result<String> {
    let model = self.config.read().await.text_model.clone();
    tracing::info!(%model, "requesting prompt enhancement");
    let body = self
      .post(&model, "generateContent", &generate_content_request(prompt))
      .await?;
    text_from(&body)
  }
}
