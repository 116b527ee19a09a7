use std::convert::Infallible;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::stream;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use tokio::sync::{mpsc, RwLock};
use tower_http::cors::{Any, CorsLayer};

use crate::config::{save_config, AppConfig};
use crate::error::StudioError;
use crate::gemini;
use crate::models::{ApiKeyRequest, CatalogResponse, GenerationSettings, ImagesQuery, SettingsPatch, TabRequest};
use crate::notifications::Notification;
use crate::studio::Studio;

pub struct RouterState {
  pub started_at: Instant,
  pub config_path: PathBuf,
  pub config: Arc<RwLock<AppConfig>>,
  pub studio: Arc<Studio>,
}

pub fn build_router(state: RouterState) -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/v1/catalog", get(catalog))
    .route("/v1/state", get(studio_state))
    .route("/v1/settings", get(get_settings).put(put_settings).patch(patch_settings))
    .route("/v1/settings/apply", post(apply_settings))
    .route("/v1/settings/template/:index", post(apply_template))
    .route("/v1/generate", post(generate))
    .route("/v1/enhance", post(enhance))
    .route("/v1/tab", put(set_tab))
    .route("/v1/images", get(images))
    .route("/v1/images/:id", delete(delete_image))
    .route("/v1/images/:id/favorite", post(toggle_favorite))
    .route("/v1/images/:id/download", get(download))
    .route("/v1/selection", delete(close_selection))
    .route("/v1/selection/:id", put(select_image))
    .route("/v1/notifications", get(notifications))
    .route("/v1/notifications/stream", get(notification_stream))
    .route("/v1/notifications/:id", delete(dismiss_notification))
    .route("/v1/config", get(get_config).put(set_config))
    .route("/v1/key", get(has_key).post(set_key))
    .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
    .with_state(Arc::new(state))
}

pub async fn run_router(listener: TcpListener, state: RouterState) -> anyhow::Result<()> {
  let app = build_router(state);
  let listener = tokio::net::TcpListener::from_std(listener)?;
  axum::serve(listener, app).await?;
  Ok(())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
  let body = Json(serde_json::json!({ "error": message, "code": code }));
  (status, body).into_response()
}

fn status_for(err: &StudioError) -> StatusCode {
  match err {
    StudioError::Validation(_) => StatusCode::BAD_REQUEST,
    StudioError::NotFound(_) => StatusCode::NOT_FOUND,
    StudioError::Busy(_) => StatusCode::CONFLICT,
    StudioError::Generation(_) | StudioError::Enhancement(_) => StatusCode::BAD_GATEWAY,
    StudioError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

fn studio_error(err: StudioError) -> Response {
  error_response(status_for(&err), err.code(), &err.to_string())
}

async fn health(State(state): State<Arc<RouterState>>) -> Json<serde_json::Value> {
  let uptime = state.started_at.elapsed().as_millis();
  Json(serde_json::json!({
    "status": "ok",
    "version": env!("CARGO_PKG_VERSION"),
    "uptime_ms": uptime
  }))
}

async fn catalog() -> Json<CatalogResponse> {
  Json(CatalogResponse::build())
}

async fn studio_state(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
  Json(state.studio.snapshot().await)
}

async fn get_settings(State(state): State<Arc<RouterState>>) -> Json<GenerationSettings> {
  Json(state.studio.settings().await)
}

async fn put_settings(
  State(state): State<Arc<RouterState>>,
  Json(settings): Json<GenerationSettings>,
) -> Json<GenerationSettings> {
  Json(state.studio.update_settings(settings).await)
}

async fn patch_settings(
  State(state): State<Arc<RouterState>>,
  Json(patch): Json<SettingsPatch>,
) -> Json<GenerationSettings> {
  Json(state.studio.patch_settings(patch).await)
}

async fn apply_settings(
  State(state): State<Arc<RouterState>>,
  Json(settings): Json<GenerationSettings>,
) -> Json<GenerationSettings> {
  Json(state.studio.apply_settings_snapshot(settings).await)
}

async fn apply_template(State(state): State<Arc<RouterState>>, Path(index): Path<usize>) -> Response {
  match state.studio.apply_template(index).await {
    Ok(settings) => Json(settings).into_response(),
    Err(err) => studio_error(err),
  }
}

// Generation and enhancement run detached from the request so a dropped
// connection cannot leave the studio stuck in a busy phase.
async fn generate(State(state): State<Arc<RouterState>>) -> Response {
  let studio = state.studio.clone();
  match tokio::spawn(async move { studio.request_generation().await }).await {
    Ok(Ok(images)) => Json(images).into_response(),
    Ok(Err(err)) => studio_error(err),
    Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "task_failed", &err.to_string()),
  }
}

async fn enhance(State(state): State<Arc<RouterState>>) -> Response {
  let studio = state.studio.clone();
  match tokio::spawn(async move { studio.request_enhancement().await }).await {
    Ok(Ok(prompt)) => Json(serde_json::json!({ "prompt": prompt })).into_response(),
    Ok(Err(err)) => studio_error(err),
    Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "task_failed", &err.to_string()),
  }
}

async fn set_tab(State(state): State<Arc<RouterState>>, Json(req): Json<TabRequest>) -> StatusCode {
  state.studio.set_tab(req.tab).await;
  StatusCode::NO_CONTENT
}

async fn images(State(state): State<Arc<RouterState>>, Query(query): Query<ImagesQuery>) -> impl IntoResponse {
  let tab = match query.tab {
    Some(tab) => tab,
    None => state.studio.snapshot().await.active_tab,
  };
  Json(state.studio.view(tab).await)
}

async fn toggle_favorite(State(state): State<Arc<RouterState>>, Path(id): Path<String>) -> Response {
  match state.studio.toggle_favorite(&id).await {
    Some(is_favorite) => Json(serde_json::json!({ "id": id, "isFavorite": is_favorite })).into_response(),
    None => studio_error(StudioError::NotFound(format!("image {id}"))),
  }
}

async fn delete_image(State(state): State<Arc<RouterState>>, Path(id): Path<String>) -> StatusCode {
  if state.studio.delete_from_history(&id).await {
    StatusCode::NO_CONTENT
  } else {
    StatusCode::NOT_FOUND
  }
}

async fn download(State(state): State<Arc<RouterState>>, Path(id): Path<String>) -> Response {
  match state.studio.download(&id).await {
    Ok(file) => (
      [
        (header::CONTENT_TYPE, file.mime.to_string()),
        (
          header::CONTENT_DISPOSITION,
          format!("attachment; filename=\"{}\"", file.file_name),
        ),
      ],
      file.bytes,
    )
      .into_response(),
    Err(err) => studio_error(err),
  }
}

async fn select_image(State(state): State<Arc<RouterState>>, Path(id): Path<String>) -> Response {
  match state.studio.select_image(&id).await {
    Ok(image) => Json(image).into_response(),
    Err(err) => studio_error(err),
  }
}

async fn close_selection(State(state): State<Arc<RouterState>>) -> StatusCode {
  state.studio.close_image().await;
  StatusCode::NO_CONTENT
}

async fn notifications(State(state): State<Arc<RouterState>>) -> Json<Vec<Notification>> {
  Json(state.studio.bus().live())
}

async fn dismiss_notification(State(state): State<Arc<RouterState>>, Path(id): Path<u64>) -> StatusCode {
  state.studio.bus().dismiss(id);
  StatusCode::NO_CONTENT
}

async fn notification_stream(
  State(state): State<Arc<RouterState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
  let (tx, mut rx) = mpsc::unbounded_channel::<Vec<Notification>>();
  let guard = state.studio.bus().subscribe_guarded(move |live| {
    let _ = tx.send(live.to_vec());
  });

  let stream = stream! {
    // Keeps the subscription alive for as long as the client is connected.
    let _guard = guard;
    while let Some(live) = rx.recv().await {
      let data = serde_json::to_string(&live).unwrap_or_else(|_| "[]".to_string());
      yield Ok(Event::default().event("notifications").data(data));
    }
  };

  Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

async fn get_config(State(state): State<Arc<RouterState>>) -> Json<AppConfig> {
  Json(state.config.read().await.clone())
}

async fn set_config(State(state): State<Arc<RouterState>>, Json(config): Json<AppConfig>) -> Response {
  if let Err(err) = save_config(&state.config_path, &config) {
    return error_response(StatusCode::INTERNAL_SERVER_ERROR, "config_save_failed", &err.to_string());
  }
  let mut current = state.config.write().await;
  let restart_required = current.needs_restart(&config);
  *current = config;
  tracing::info!(restart_required, "config updated");
  Json(serde_json::json!({ "restartRequired": restart_required })).into_response()
}

async fn set_key(Json(req): Json<ApiKeyRequest>) -> Response {
  if req.key.trim().is_empty() {
    return error_response(StatusCode::BAD_REQUEST, "key_missing", "API key must not be empty.");
  }
  match gemini::set_api_key(req.key.trim()) {
    Ok(()) => StatusCode::NO_CONTENT.into_response(),
    Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "key_store_failed", &err.to_string()),
  }
}

async fn has_key() -> Json<serde_json::Value> {
  Json(serde_json::json!({ "present": gemini::has_api_key() }))
}

#[cfg(test)]
mod tests {
  use async_trait::async_trait;
  use axum::body::{to_bytes, Body};
  use axum::http::{Method, Request};
  use tokio_stream::StreamExt;
  use tower::ServiceExt;

  use super::*;
  use crate::gemini::{ImageGenerator, PromptEnhancer};
  use crate::history::{HistoryStore, DEFAULT_HISTORY_KEY};
  use crate::models::{GeneratedImage, ViewTab};
  use crate::notifications::{NotificationBus, Severity};
  use crate::storage::SqliteStore;

  struct Canned;

  #[async_trait]
  impl ImageGenerator for Canned {
    async fn generate(&self, settings: &GenerationSettings) -> anyhow::Result<Vec<String>> {
      Ok((0..settings.num_images).map(|_| "aGVsbG8=".to_string()).collect())
    }
  }

  #[async_trait]
  impl PromptEnhancer for Canned {
    async fn enhance(&self, prompt: &str) -> anyhow::Result<String> {
      Ok(format!("{prompt}, highly detailed"))
    }
  }

  async fn app(dir: &tempfile::TempDir) -> (Router, NotificationBus) {
    let bus = NotificationBus::default();
    let kv = Arc::new(SqliteStore::open(&dir.path().join("test.sqlite3")).unwrap());
    let history = HistoryStore::load(kv, DEFAULT_HISTORY_KEY, bus.clone()).await;
    let canned = Arc::new(Canned);
    let studio = Arc::new(Studio::new(
      GenerationSettings::default(),
      history,
      canned.clone(),
      canned,
      bus.clone(),
    ));
    let router = build_router(RouterState {
      started_at: Instant::now(),
      config_path: dir.path().join("config.json"),
      config: Arc::new(RwLock::new(AppConfig::default())),
      studio,
    });
    (router, bus)
  }

  async fn call(router: &Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, Vec<u8>) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
      Some(json) => {
        req = req.header(header::CONTENT_TYPE, "application/json");
        Body::from(json.to_string())
      }
      None => Body::empty(),
    };
    let resp = router.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
  }

  #[tokio::test]
  async fn generate_without_prompt_is_rejected_with_one_error() {
    let dir = tempfile::tempdir().unwrap();
    let (router, bus) = app(&dir).await;

    let (status, body) = call(&router, Method::POST, "/v1/generate", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["code"], "validation_failed");

    let (_, body) = call(&router, Method::GET, "/v1/notifications", None).await;
    let live: Vec<Notification> = serde_json::from_slice(&body).unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].severity, Severity::Error);
    assert_eq!(bus.live(), live);
  }

  #[tokio::test]
  async fn generate_then_browse_history_and_download() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _) = app(&dir).await;

    let patch = serde_json::json!({ "prompt": "a red fox", "numImages": 2, "outputFormat": "image/png" });
    let (status, _) = call(&router, Method::PATCH, "/v1/settings", Some(patch)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&router, Method::POST, "/v1/generate", None).await;
    assert_eq!(status, StatusCode::OK);
    let batch: Vec<GeneratedImage> = serde_json::from_slice(&body).unwrap();
    assert_eq!(batch.len(), 2);

    let (_, body) = call(&router, Method::GET, "/v1/images?tab=history", None).await;
    let history: Vec<GeneratedImage> = serde_json::from_slice(&body).unwrap();
    assert_eq!(history, batch);

    let uri = format!("/v1/images/{}/favorite", batch[0].id);
    let (status, body) = call(&router, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["isFavorite"], true);

    let (_, body) = call(&router, Method::GET, "/v1/images?tab=favorites", None).await;
    let favorites: Vec<GeneratedImage> = serde_json::from_slice(&body).unwrap();
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites[0].id, batch[0].id);

    let uri = format!("/v1/images/{}/download", batch[1].id);
    let (status, body) = call(&router, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"hello");

    let uri = format!("/v1/images/{}", batch[1].id);
    let (status, _) = call(&router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn enhance_rewrites_the_draft_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _) = app(&dir).await;
    call(&router, Method::PATCH, "/v1/settings", Some(serde_json::json!({ "prompt": "owl" }))).await;

    let (status, body) = call(&router, Method::POST, "/v1/enhance", None).await;
    assert_eq!(status, StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["prompt"], "owl, highly detailed");

    let (_, body) = call(&router, Method::GET, "/v1/settings", None).await;
    let settings: GenerationSettings = serde_json::from_slice(&body).unwrap();
    assert_eq!(settings.prompt, "owl, highly detailed");
  }

  #[tokio::test]
  async fn tab_and_selection_round_trip_through_state() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _) = app(&dir).await;

    let (status, _) = call(&router, Method::PUT, "/v1/tab", Some(serde_json::json!({ "tab": "history" }))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&router, Method::PUT, "/v1/selection/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = call(&router, Method::GET, "/v1/state", None).await;
    let state: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(state["activeTab"], serde_json::to_value(ViewTab::History).unwrap());
    assert_eq!(state["isLoading"], false);
  }

  async fn next_event(body: &mut axum::body::BodyDataStream) -> String {
    let chunk = body.next().await.unwrap().unwrap();
    String::from_utf8(chunk.to_vec()).unwrap()
  }

  #[tokio::test]
  async fn notification_stream_pushes_the_live_set() {
    let dir = tempfile::tempdir().unwrap();
    let (router, bus) = app(&dir).await;

    let req = Request::builder()
      .uri("/v1/notifications/stream")
      .body(Body::empty())
      .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(bus.subscriber_count(), 1);

    let mut body = resp.into_body().into_data_stream();
    let first = next_event(&mut body).await;
    assert!(first.starts_with("event: notifications\n"));
    assert!(first.contains("data: []\n"));

    bus.info("Settings loaded.");
    let second = next_event(&mut body).await;
    assert!(second.starts_with("event: notifications\n"));
    let data = second.lines().find_map(|l| l.strip_prefix("data: ")).unwrap();
    let live: Vec<Notification> = serde_json::from_str(data).unwrap();
    assert_eq!(live, bus.live());
    assert_eq!(live[0].message, "Settings loaded.");

    drop(body);
    assert_eq!(bus.subscriber_count(), 0);
  }

  #[tokio::test]
  async fn config_updates_are_written_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _) = app(&dir).await;
    let config = AppConfig {
      image_model: "imagen-3.0-generate-002".to_string(),
      ..AppConfig::default()
    };

    let (status, body) = call(&router, Method::PUT, "/v1/config", Some(serde_json::to_value(&config).unwrap())).await;
    assert_eq!(status, StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["restartRequired"], false);
    let (_, body) = call(&router, Method::GET, "/v1/config", None).await;
    let stored: AppConfig = serde_json::from_slice(&body).unwrap();
    assert_eq!(stored, config);
    assert!(dir.path().join("config.json").exists());

    let config = AppConfig {
      notification_ttl_ms: 9000,
      ..config
    };
    let (_, body) = call(&router, Method::PUT, "/v1/config", Some(serde_json::to_value(&config).unwrap())).await;
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["restartRequired"], true);
  }

  #[test]
  fn studio_errors_map_to_http_statuses() {
    assert_eq!(status_for(&StudioError::Validation("x".into())), StatusCode::BAD_REQUEST);
    assert_eq!(status_for(&StudioError::NotFound("x".into())), StatusCode::NOT_FOUND);
    assert_eq!(status_for(&StudioError::Busy("image generation")), StatusCode::CONFLICT);
    assert_eq!(status_for(&StudioError::Generation("x".into())), StatusCode::BAD_GATEWAY);
    assert_eq!(status_for(&StudioError::Enhancement("x".into())), StatusCode::BAD_GATEWAY);
    assert_eq!(
      status_for(&StudioError::Persistence("x".into())),
      StatusCode::INTERNAL_SERVER_ERROR
    );
  }

  #[test]
  fn busy_error_reads_naturally() {
    let err = StudioError::Busy("image generation");
    assert_eq!(err.to_string(), "image generation already in progress");
    assert_eq!(err.code(), "busy");
  }
}
