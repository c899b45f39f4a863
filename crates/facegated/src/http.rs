//! HTTP surface: capture submission for registration and login, plus
//! read-only gallery listing and health.

use crate::engine::{EngineError, EngineHandle};
use axum::extract::rejection::FormRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use facegate_core::payload;
use facegate_core::{FaceGateError, FaceSummary, LoginOutcome};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct AppState {
    engine: EngineHandle,
}

/// Browser capture form: `image_data` holds a `data:image/...;base64,` URL.
#[derive(Debug, Deserialize)]
pub struct CaptureForm {
    #[serde(default)]
    pub image_data: Option<String>,
}

/// Decision document returned by `/register` and `/login`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DecisionResponse {
    pub status: String,
    pub outcome: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reference: Option<String>,
}

impl DecisionResponse {
    fn ok(outcome: &str, message: impl Into<String>) -> Self {
        Self {
            status: "ok".into(),
            outcome: outcome.into(),
            message: message.into(),
            identity: None,
            distance: None,
            reference: None,
        }
    }

    fn error(outcome: &str, message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            ..Self::ok(outcome, message)
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub gallery_size: usize,
    pub metric: String,
    pub threshold: f32,
}

type Decision = (StatusCode, Json<DecisionResponse>);

pub fn router(engine: EngineHandle, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/faces", get(list_faces))
        .route("/healthz", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { engine })
}

async fn register(
    State(state): State<AppState>,
    form: Result<Form<CaptureForm>, FormRejection>,
) -> Decision {
    let image = match capture_bytes(form) {
        Ok(image) => image,
        Err(rejection) => return rejection,
    };

    match state.engine.register(image).await {
        Ok(record) => {
            let mut body = DecisionResponse::ok("REGISTERED", "Face registered successfully.");
            body.reference = Some(record.image_reference);
            (StatusCode::CREATED, Json(body))
        }
        Err(err) => engine_failure(err),
    }
}

async fn login(
    State(state): State<AppState>,
    form: Result<Form<CaptureForm>, FormRejection>,
) -> Decision {
    let image = match capture_bytes(form) {
        Ok(image) => image,
        Err(rejection) => return rejection,
    };

    match state.engine.login(image).await {
        Ok(LoginOutcome::Matched { identity, distance }) => {
            let mut body = DecisionResponse::ok(
                "MATCHED",
                format!("Face match successfully with {identity}"),
            );
            body.identity = Some(identity);
            body.distance = Some(distance);
            (StatusCode::OK, Json(body))
        }
        Ok(LoginOutcome::NotMatched { distance }) => {
            let mut body = DecisionResponse::ok(
                "NOT_MATCHED",
                format!("Face not matched. Distance: {distance:.2}"),
            );
            body.distance = Some(distance);
            (StatusCode::OK, Json(body))
        }
        Err(err) => engine_failure(err),
    }
}

async fn list_faces(
    State(state): State<AppState>,
) -> Result<Json<Vec<FaceSummary>>, Decision> {
    state.engine.list_faces().await.map(Json).map_err(engine_failure)
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, Decision> {
    let gallery_size = state.engine.gallery_size().await.map_err(engine_failure)?;
    let matcher = state.engine.matcher_config();
    Ok(Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        gallery_size,
        metric: matcher.metric.to_string(),
        threshold: matcher.threshold,
    }))
}

/// Pull the photo bytes out of the submitted form.
fn capture_bytes(form: Result<Form<CaptureForm>, FormRejection>) -> Result<Vec<u8>, Decision> {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            tracing::info!(error = %rejection, "capture exceeds upload limit");
            return Err((
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(DecisionResponse::error("PAYLOAD_TOO_LARGE", "The image is too large.")),
            ));
        }
        Err(rejection) => {
            tracing::debug!(error = %rejection, "rejected capture form");
            return Err(missing_image());
        }
    };

    let Some(data) = form.image_data.filter(|d| !d.trim().is_empty()) else {
        return Err(missing_image());
    };

    payload::decode_data_url(&data).map_err(|err| {
        tracing::info!(error = %err, "undecodable capture payload");
        gate_failure(&FaceGateError::InvalidImage(err.to_string()))
    })
}

fn missing_image() -> Decision {
    (
        StatusCode::BAD_REQUEST,
        Json(DecisionResponse::error("MISSING_IMAGE", "No image received.")),
    )
}

fn engine_failure(err: EngineError) -> Decision {
    match err {
        EngineError::Gate(err) => gate_failure(&err),
        EngineError::ChannelClosed | EngineError::Spawn(_) => {
            tracing::error!(error = %err, "engine unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(DecisionResponse::error(
                    "ENGINE_UNAVAILABLE",
                    "Face recognition is unavailable right now. Please try again later.",
                )),
            )
        }
    }
}

fn gate_failure(err: &FaceGateError) -> Decision {
    let (status, outcome) = match err {
        FaceGateError::InvalidImage(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_IMAGE"),
        FaceGateError::NoFaceDetected => (StatusCode::UNPROCESSABLE_ENTITY, "NO_FACE_DETECTED"),
        FaceGateError::AlreadyRegistered { .. } => (StatusCode::CONFLICT, "ALREADY_REGISTERED"),
        FaceGateError::NoRegisteredFaces => (StatusCode::NOT_FOUND, "NO_REGISTERED_FACES"),
        FaceGateError::ProviderError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PROVIDER_ERROR"),
        FaceGateError::DimensionMismatch(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "DIMENSION_MISMATCH")
        }
        FaceGateError::DuplicateReference(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "DUPLICATE_REFERENCE")
        }
        FaceGateError::StoreError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
    };

    let mut body = DecisionResponse::error(outcome, err.user_message());
    if let FaceGateError::AlreadyRegistered { reference, distance } = err {
        body.identity = Some(reference.clone());
        body.distance = Some(*distance);
    }
    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{png, test_engine};
    use axum::body::Body;
    use axum::http::{header, Request};
    use base64::Engine as _;
    use tower::ServiceExt;

    fn data_url(bytes: &[u8]) -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(bytes)
        )
    }

    /// application/x-www-form-urlencoded value encoding.
    fn form_encode(value: &str) -> String {
        value
            .bytes()
            .map(|b| match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'*' => {
                    (b as char).to_string()
                }
                _ => format!("%{b:02X}"),
            })
            .collect()
    }

    fn capture_request(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    fn submit(uri: &str, colour: [u8; 3]) -> Request<Body> {
        capture_request(uri, format!("image_data={}", form_encode(&data_url(&png(colour)))))
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn app(dir: &tempfile::TempDir) -> Router {
        router(test_engine(dir.path()), 4 * 1024 * 1024)
    }

    #[tokio::test]
    async fn test_register_and_login_flow() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);

        let (status, body) = send(&app, submit("/register", [200, 40, 40])).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["outcome"], "REGISTERED");
        assert_eq!(body["message"], "Face registered successfully.");
        let reference = body["reference"].as_str().unwrap().to_string();
        assert!(dir.path().join(&reference).exists());

        let (status, body) = send(&app, submit("/login", [198, 42, 41])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "MATCHED");
        assert_eq!(body["identity"], reference.as_str());
        assert!(body["distance"].as_f64().unwrap() < 0.68);
    }

    #[tokio::test]
    async fn test_register_twice_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);

        send(&app, submit("/register", [30, 30, 200])).await;
        let (status, body) = send(&app, submit("/register", [30, 30, 200])).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], "error");
        assert_eq!(body["outcome"], "ALREADY_REGISTERED");
        assert_eq!(body["message"], "This face is already registered.");
    }

    #[tokio::test]
    async fn test_login_empty_gallery() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);

        let (status, body) = send(&app, submit("/login", [200, 40, 40])).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["outcome"], "NO_REGISTERED_FACES");
        assert_eq!(body["message"], "No faces registered yet. Please register first.");
    }

    #[tokio::test]
    async fn test_login_not_matched() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);

        send(&app, submit("/register", [255, 0, 0])).await;
        let (status, body) = send(&app, submit("/login", [0, 0, 255])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "NOT_MATCHED");
        assert_eq!(body["message"], "Face not matched. Distance: 1.00");
        assert!(body.get("identity").is_none());
    }

    #[tokio::test]
    async fn test_missing_image_field() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);

        let (status, body) = send(&app, capture_request("/register", String::new())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["outcome"], "MISSING_IMAGE");
        assert_eq!(body["message"], "No image received.");
    }

    #[tokio::test]
    async fn test_garbage_payload_is_invalid_image() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);

        let body = format!("image_data={}", form_encode("data:image/png;base64,!!!notbase64"));
        let (status, json) = send(&app, capture_request("/login", body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["outcome"], "INVALID_IMAGE");

        let body = format!("image_data={}", form_encode(&data_url(b"not really a png")));
        let (status, json) = send(&app, capture_request("/register", body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["outcome"], "INVALID_IMAGE");
    }

    #[tokio::test]
    async fn test_no_face_detected() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);

        let (status, body) = send(&app, submit("/register", [0, 0, 0])).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["outcome"], "NO_FACE_DETECTED");
    }

    #[tokio::test]
    async fn test_faces_and_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);
        send(&app, submit("/register", [12, 200, 90])).await;

        let req = Request::builder().uri("/faces").body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        let faces = body.as_array().unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0]["dim"], 3);

        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["gallery_size"], 1);
        assert_eq!(body["metric"], "cosine");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_body_limit() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_engine(dir.path()), 64);

        let (status, body) = send(&app, submit("/register", [200, 40, 40])).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["outcome"], "PAYLOAD_TOO_LARGE");
    }
}
