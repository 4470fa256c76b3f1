use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Json, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::AudioClip;
use crate::bus::EventBus;
use crate::customer::PageContext;
use crate::dom::{Page, PageSnapshot};
use crate::error::MediaFailure;
use crate::widget::shim::{ShimPlayer, ShimRecorder};
use crate::widget::{Interface, SendOutcome, UiState, Widget, WidgetStatus};

// -----------------------------------------------------------------------------
// Request / response bodies
// -----------------------------------------------------------------------------

/// Posted by the shim after every page load.
#[derive(Debug, Deserialize)]
pub struct PageUpdate {
    #[serde(flatten)]
    pub snapshot: PageSnapshot,
    #[serde(default)]
    pub context: PageContext,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiCommand {
    Open,
    Close,
    Minimize,
    Maximize,
    Clear,
}

#[derive(Debug, Deserialize)]
pub struct InterfaceRequest {
    pub interface: Interface,
    pub command: UiCommand,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct MessageResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

impl From<SendOutcome> for MessageResponse {
    fn from(outcome: SendOutcome) -> Self {
        let (outcome, answer) = match outcome {
            SendOutcome::Answered(response) => ("answered", Some(response.answer)),
            SendOutcome::Rejected => ("rejected", None),
            SendOutcome::HandledLocally => ("handled_locally", None),
            SendOutcome::Failed => ("failed", None),
            SendOutcome::Discarded => ("discarded", None),
        };
        Self { outcome, answer }
    }
}

#[derive(Debug, Deserialize)]
pub struct MediaErrorReport {
    pub error: String,
    #[serde(default)]
    pub detail: Option<String>,
}

impl MediaErrorReport {
    fn failure(&self) -> MediaFailure {
        match self.error.as_str() {
            "NotAllowedError" | "permission_denied" => MediaFailure::PermissionDenied,
            "NotSupportedError" | "unsupported" => MediaFailure::Unsupported,
            "NotFoundError" | "no_device" => MediaFailure::NoDevice,
            other => MediaFailure::Other(self.detail.clone().unwrap_or_else(|| other.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LevelReport {
    pub level: f32,
}

#[derive(Debug, Deserialize)]
pub struct PlaybackReport {
    #[serde(default = "played_default")]
    pub played: bool,
}

fn played_default() -> bool {
    true
}

// -----------------------------------------------------------------------------
// Server State
// -----------------------------------------------------------------------------

pub struct AppState {
    pub widget: Arc<Widget>,
    pub page: Arc<Page>,
    pub bus: Arc<EventBus>,
    pub recorder: Arc<ShimRecorder>,
    pub player: Arc<ShimPlayer>,
}

pub struct WidgetServer {
    state: Arc<AppState>,
}

impl WidgetServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/sse", get(sse_handler))
            .route("/state", get(state_handler))
            .route("/page", post(page_handler))
            .route("/interface", post(interface_handler))
            .route("/messages", post(messages_handler))
            .route("/voice", post(voice_upload_handler))
            .route("/voice/toggle", post(voice_toggle_handler))
            .route("/voice/error", post(voice_error_handler))
            .route("/voice/level", post(voice_level_handler))
            .route("/voice/played", post(voice_played_handler))
            .with_state(self.state.clone())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, axum::BoxError>>> {
    info!("New SSE connection established");
    let mut rx = state.bus.subscribe();
    let status = state.widget.status();

    let stream = async_stream::stream! {
        match SseEvent::default().event("status").json_data(&status) {
            Ok(initial) => yield Ok(initial),
            Err(e) => warn!("status event not serialized: {}", e),
        }

        loop {
            match rx.recv().await {
                Ok(event) => match SseEvent::default().json_data(&event) {
                    Ok(sse) => yield Ok(sse),
                    Err(e) => warn!("event not serialized: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("SSE client lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn state_handler(State(state): State<Arc<AppState>>) -> Json<WidgetStatus> {
    Json(state.widget.status())
}

async fn page_handler(
    State(state): State<Arc<AppState>>,
    Json(update): Json<PageUpdate>,
) -> Json<WidgetStatus> {
    info!("page loaded: {}", update.snapshot.url.as_deref().unwrap_or("-"));
    state.page.load(&update.snapshot);
    state.widget.page_changed(update.context).await;
    Json(state.widget.status())
}

async fn interface_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InterfaceRequest>,
) -> Json<UiState> {
    let widget = &state.widget;
    match (request.interface, request.command) {
        (Interface::Text, UiCommand::Open) => {
            widget.text().open();
        }
        (Interface::Text, UiCommand::Close) => widget.text().close(),
        (Interface::Text, UiCommand::Minimize) => {
            widget.text().minimize();
        }
        (Interface::Text, UiCommand::Maximize) => {
            widget.text().maximize();
        }
        (Interface::Text, UiCommand::Clear) => widget.text().conversation().clear().await,
        (Interface::Voice, UiCommand::Open) => {
            widget.voice().open();
        }
        (Interface::Voice, UiCommand::Close) => widget.voice().close().await,
        (Interface::Voice, UiCommand::Minimize) => {
            widget.voice().minimize();
        }
        (Interface::Voice, UiCommand::Maximize) => {
            widget.voice().maximize();
        }
        (Interface::Voice, UiCommand::Clear) => widget.voice().conversation().clear().await,
    }
    Json(widget.ui().state())
}

async fn messages_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MessageRequest>,
) -> Json<MessageResponse> {
    let outcome = state.widget.text().send(&request.text).await;
    Json(outcome.into())
}

/// Starts a recording, or stops the current one. The exchange that follows
/// a stop runs in the background; its results arrive over SSE.
async fn voice_toggle_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let voice = state.widget.voice().clone();
    if voice.is_recording() {
        tokio::spawn(async move {
            voice.stop_recording().await;
        });
    } else {
        // Failures are rendered into the voice transcript.
        let _ = voice.start_recording().await;
    }
    (
        StatusCode::ACCEPTED,
        Json(json!({ "recording": state.widget.voice().is_recording() })),
    )
}

async fn voice_upload_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, "empty recording").into_response();
    }
    let mime = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("audio/webm")
        .to_string();
    let clip = AudioClip::new(body.to_vec(), mime);

    let voice = state.widget.voice().clone();
    if voice.is_recording() {
        state.recorder.deliver(clip);
        tokio::spawn(async move {
            voice.stop_recording().await;
        });
    } else if !state.recorder.is_awaited() {
        tokio::spawn(async move {
            voice.submit_audio(clip).await;
        });
    } else {
        state.recorder.deliver(clip);
    }
    StatusCode::ACCEPTED.into_response()
}

async fn voice_error_handler(
    State(state): State<Arc<AppState>>,
    Json(report): Json<MediaErrorReport>,
) -> StatusCode {
    let failure = report.failure();
    let voice = state.widget.voice();
    if voice.is_recording() {
        state.recorder.fail(failure);
        let voice = voice.clone();
        tokio::spawn(async move {
            voice.stop_recording().await;
        });
    } else if state.recorder.is_awaited() {
        state.recorder.fail(failure);
    } else {
        voice.media_failed(&failure);
    }
    StatusCode::NO_CONTENT
}

async fn voice_level_handler(
    State(state): State<Arc<AppState>>,
    Json(report): Json<LevelReport>,
) -> StatusCode {
    state.recorder.set_level(report.level);
    StatusCode::NO_CONTENT
}

async fn voice_played_handler(
    State(state): State<Arc<AppState>>,
    Json(report): Json<PlaybackReport>,
) -> StatusCode {
    if state.player.finished(report.played) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::CONFLICT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::MemoryStorage;
    use crate::testing::{MockBackend, MockStorefront};
    use crate::widget::WidgetParts;
    use serde_json::json;
    use std::time::Duration;

    fn app(backend: Arc<MockBackend>) -> Arc<AppState> {
        let config = Config::from_lookup(|key| match key {
            "VOICERO_STORE_URL" => Some("https://shop.example".into()),
            "VOICERO_AUTO_SUBMIT_DELAY_MS" => Some("0".into()),
            _ => None,
        })
        .unwrap();
        let bus = Arc::new(EventBus::new());
        let page = Arc::new(Page::empty().with_bus(bus.clone()));
        let recorder = Arc::new(ShimRecorder::with_timeout(Duration::from_secs(1)));
        let player = Arc::new(ShimPlayer::with_timeout(bus.clone(), Duration::from_millis(50)));
        let widget = Arc::new(Widget::new(
            &config,
            WidgetParts {
                backend,
                storefront: Arc::new(MockStorefront::default()),
                storage: Arc::new(MemoryStorage::new()),
                doc: page.clone(),
                bus: bus.clone(),
                recorder: recorder.clone(),
                player: player.clone(),
                context: PageContext::default(),
                cached_threads: Vec::new(),
            },
        ));
        Arc::new(AppState {
            widget,
            page,
            bus,
            recorder,
            player,
        })
    }

    #[tokio::test]
    async fn page_update_replaces_the_document_and_customer() {
        let state = app(Arc::new(MockBackend::default()));
        let update: PageUpdate = serde_json::from_value(json!({
            "url": "https://shop.example/products/tee",
            "body": [{"tag": "h1", "children": ["Tee"]}],
            "context": {"shopifyCustomer": {"id": 7, "email": "ann@example.com"}}
        }))
        .unwrap();

        let Json(status) = page_handler(State(state.clone()), Json(update)).await;

        assert!(status.logged_in);
        assert_eq!(
            crate::dom::Document::url(state.page.as_ref()).as_deref(),
            Some("https://shop.example/products/tee")
        );
    }

    #[tokio::test]
    async fn messages_route_reports_the_outcome() {
        let backend = Arc::new(MockBackend::default());
        backend.queue_chat(json!({"response": {"answer": "We ship worldwide."}}));
        let state = app(backend);

        let Json(reply) = messages_handler(
            State(state.clone()),
            Json(MessageRequest {
                text: "do you ship to Canada?".into(),
            }),
        )
        .await;

        assert_eq!(
            reply,
            MessageResponse {
                outcome: "answered",
                answer: Some("We ship worldwide.".into()),
            }
        );
        let Json(empty) = messages_handler(State(state), Json(MessageRequest { text: "  ".into() })).await;
        assert_eq!(empty.outcome, "rejected");
    }

    #[tokio::test]
    async fn interface_commands_drive_the_ui() {
        let state = app(Arc::new(MockBackend::default()));
        let Json(ui) = interface_handler(
            State(state.clone()),
            Json(InterfaceRequest {
                interface: Interface::Voice,
                command: UiCommand::Open,
            }),
        )
        .await;
        assert!(ui.is_open(Interface::Voice));

        let Json(ui) = interface_handler(
            State(state),
            Json(InterfaceRequest {
                interface: Interface::Voice,
                command: UiCommand::Close,
            }),
        )
        .await;
        assert_eq!(ui, UiState::Closed);
    }

    #[tokio::test]
    async fn denied_microphone_is_rendered_in_voice_chat() {
        let state = app(Arc::new(MockBackend::default()));
        let status = voice_error_handler(
            State(state.clone()),
            Json(MediaErrorReport {
                error: "NotAllowedError".into(),
                detail: None,
            }),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let messages = state.widget.voice().conversation().messages();
        assert!(messages[0].content.contains("microphone access"));
    }

    #[test]
    fn browser_error_names_map_to_failures() {
        let report = |error: &str| MediaErrorReport {
            error: error.into(),
            detail: None,
        };
        assert_eq!(report("NotFoundError").failure(), MediaFailure::NoDevice);
        assert_eq!(report("unsupported").failure(), MediaFailure::Unsupported);
        assert_eq!(
            report("AbortError").failure(),
            MediaFailure::Other("AbortError".into())
        );
    }
}
