use axum::{
    Json, Router,
    body::Bytes,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_macros::debug_handler;
use chrono::{SecondsFormat, Utc};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use std::sync::Arc;

use crate::{
    config::Config,
    dto::{Recipients, SendEmailRequest, SendEmailResponse},
    service::Mailer,
    validator::{self, Validation},
};

const MISSING_FIELDS_MESSAGE: &str = "Bad Request: Missing required fields (to, subject, html).";
const MALFORMED_BODY_MESSAGE: &str = "Bad Request: Malformed JSON body.";

#[derive(OpenApi)]
#[openapi(
    paths(health_check, send_email),
    components(schemas(SendEmailRequest, SendEmailResponse, Recipients)),
    tags(
        (name = "email", description = "Email relay API")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub mailer: Arc<dyn Mailer>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/send-email", post(send_email))
        .route("/api-doc/openapi.json", get(openapi))
        .with_state(state)
        .layer(middleware::from_fn(log_request))
        .layer(TraceLayer::new_for_http())
}

async fn log_request(request: Request, next: Next) -> Response {
    tracing::info!(
        "[{}] {} {}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        request.method(),
        request.uri()
    );
    next.run(request).await
}

#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service is running", body = String)
    ),
    tag = "email"
)]
#[debug_handler]
pub async fn health_check() -> Response {
    (StatusCode::OK, "Email relay service is running!").into_response()
}

#[utoipa::path(
    post,
    path = "/send-email",
    request_body = SendEmailRequest,
    responses(
        (status = 200, description = "Email accepted by the relay", body = SendEmailResponse),
        (status = 400, description = "Malformed body or missing required fields", body = SendEmailResponse),
        (status = 401, description = "Invalid API secret", body = SendEmailResponse),
        (status = 500, description = "Relay rejected the email or was unreachable", body = SendEmailResponse)
    ),
    tag = "email"
)]
#[debug_handler]
pub async fn send_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload = match parse_payload(&headers, &body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("Bad request to send email, malformed JSON body: {e}");
            return (
                StatusCode::BAD_REQUEST,
                Json(SendEmailResponse::rejected(MALFORMED_BODY_MESSAGE)),
            )
                .into_response();
        }
    };

    let email = match validator::validate(payload, state.config.api_secret.as_deref()) {
        Validation::Valid(email) => email,
        Validation::Unauthorized => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(SendEmailResponse::rejected("Unauthorized")),
            )
                .into_response();
        }
        Validation::BadRequest { missing } => {
            return (
                StatusCode::BAD_REQUEST,
                Json(SendEmailResponse::missing_fields(
                    MISSING_FIELDS_MESSAGE,
                    &missing,
                )),
            )
                .into_response();
        }
    };

    match state.mailer.send(&email).await {
        Ok(message_id) => {
            tracing::info!("Email sent successfully, message id {}", message_id);
            (StatusCode::OK, Json(SendEmailResponse::sent(message_id))).into_response()
        }
        Err(e) => {
            tracing::error!(error = ?e, "Error sending email: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SendEmailResponse::send_failed(e.to_string())),
            )
                .into_response()
        }
    }
}

/// Only a JSON body that fails to parse is rejected here.
///
/// Other content types, empty bodies and non-object JSON decode as an empty
/// request, so the secret check still decides the response.
fn parse_payload(headers: &HeaderMap, body: &[u8]) -> Result<SendEmailRequest, serde_json::Error> {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|mime| mime.trim().to_ascii_lowercase())
        .is_some_and(|mime| mime == "application/json" || mime.ends_with("+json"));

    if !is_json || body.iter().all(u8::is_ascii_whitespace) {
        return Ok(SendEmailRequest::default());
    }

    match serde_json::from_slice(body) {
        Ok(request) => Ok(request),
        Err(e) if e.is_syntax() || e.is_eof() => Err(e),
        Err(_) => Ok(SendEmailRequest::default()),
    }
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    use crate::{service::SendError, validator::OutgoingEmail};

    /// Records every email it is asked to send.
    struct RecordingMailer {
        sent: Mutex<Vec<OutgoingEmail>>,
        fail: bool,
    }

    impl RecordingMailer {
        fn succeeding() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &OutgoingEmail) -> Result<String, SendError> {
            self.sent.lock().await.push(email.clone());
            if self.fail {
                return Err(SendError::NotConfigured);
            }
            Ok("m1".to_string())
        }
    }

    fn app(secret: Option<&str>, mailer: Arc<RecordingMailer>) -> Router {
        let config = Config {
            api_secret: secret.map(str::to_string),
            ..Config::default()
        };
        app_with_config(config, mailer)
    }

    fn app_with_config(config: Config, mailer: Arc<RecordingMailer>) -> Router {
        router(AppState {
            config: Arc::new(config),
            mailer,
        })
    }

    fn post_raw(content_type: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/send-email");
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn post_json(body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/send-email")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_check_returns_200_without_config() {
        let response = app(None, RecordingMailer::succeeding())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(!bytes.is_empty());
    }

    #[tokio::test]
    async fn sends_email_and_echoes_message_id() {
        let mailer = RecordingMailer::succeeding();
        let response = app(Some("S"), mailer.clone())
            .oneshot(post_json(&json!({
                "to": "a@b.com",
                "subject": "Hi",
                "html": "<p>x</p>",
                "secret": "S"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["messageId"], json!("m1"));

        let sent = mailer.sent.lock().await;
        assert_eq!(
            *sent,
            vec![OutgoingEmail {
                to: vec!["a@b.com".into()],
                subject: "Hi".into(),
                html: "<p>x</p>".into(),
                text: None,
            }]
        );
    }

    #[tokio::test]
    async fn forwards_text_body_and_recipient_list() {
        let mailer = RecordingMailer::succeeding();
        let response = app(Some("S"), mailer.clone())
            .oneshot(post_json(&json!({
                "to": ["a@b.com", "c@d.com"],
                "subject": "Hi",
                "html": "<p>x</p>",
                "text": "x",
                "secret": "S"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let sent = mailer.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["a@b.com".to_string(), "c@d.com".to_string()]);
        assert_eq!(sent[0].text.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn wrong_secret_returns_401() {
        let mailer = RecordingMailer::succeeding();
        let response = app(Some("S"), mailer.clone())
            .oneshot(post_json(&json!({
                "to": "a@b.com",
                "subject": "Hi",
                "html": "<p>x</p>",
                "secret": "wrong"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(response).await,
            json!({ "success": false, "message": "Unauthorized" })
        );
        assert!(mailer.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn missing_secret_returns_401_even_with_bad_fields() {
        let response = app(Some("S"), RecordingMailer::succeeding())
            .oneshot(post_json(&json!({ "subject": 5 })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_fields_return_400() {
        let mailer = RecordingMailer::succeeding();
        let response = app(Some("S"), mailer.clone())
            .oneshot(post_json(&json!({ "to": "a@b.com", "secret": "S" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["message"], json!(MISSING_FIELDS_MESSAGE));
        assert_eq!(body["missing"], json!(["subject", "html"]));
        assert!(mailer.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_json_returns_400() {
        let request = Request::builder()
            .method("POST")
            .uri("/send-email")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app(Some("S"), RecordingMailer::succeeding())
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["success"], json!(false));
    }

    #[tokio::test]
    async fn undecodable_bodies_without_secret_return_401() {
        let valid_fields = json!({
            "to": "a@b.com",
            "subject": "Hi",
            "html": "<p>x</p>",
            "secret": "wrong"
        })
        .to_string();

        let requests = [
            post_raw(Some("text/plain"), &valid_fields),
            post_raw(None, ""),
            post_raw(Some("application/json"), ""),
            post_raw(Some("application/json"), "[1, 2]"),
            post_raw(Some("application/json"), "null"),
        ];

        for request in requests {
            let mailer = RecordingMailer::succeeding();
            let response = app(Some("S"), mailer.clone())
                .oneshot(request)
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert!(mailer.sent.lock().await.is_empty());
        }
    }

    #[tokio::test]
    async fn json_with_charset_and_suffix_types_is_decoded() {
        let body = json!({
            "to": "a@b.com",
            "subject": "Hi",
            "html": "<p>x</p>",
            "secret": "S"
        })
        .to_string();

        for content_type in ["application/json; charset=utf-8", "application/vnd.api+json"] {
            let response = app(Some("S"), RecordingMailer::succeeding())
                .oneshot(post_raw(Some(content_type), &body))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn blank_configured_secret_still_requires_a_matching_secret() {
        let config = Config::from_lookup(|key| (key == "API_SECRET_KEY").then(String::new)).unwrap();
        let fields = json!({ "to": "a@b.com", "subject": "Hi", "html": "<p>x</p>" });

        let mailer = RecordingMailer::succeeding();
        let response = app_with_config(config.clone(), mailer.clone())
            .oneshot(post_json(&fields))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(mailer.sent.lock().await.is_empty());

        let mut with_secret = fields;
        with_secret["secret"] = json!("");
        let response = app_with_config(config, RecordingMailer::succeeding())
            .oneshot(post_json(&with_secret))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn send_failure_returns_500_with_error() {
        let mailer = RecordingMailer::failing();
        let response = app(Some("S"), mailer.clone())
            .oneshot(post_json(&json!({
                "to": "a@b.com",
                "subject": "Hi",
                "html": "<p>x</p>",
                "secret": "S"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await,
            json!({
                "success": false,
                "message": "Failed to send email.",
                "error": "SMTP host is not configured"
            })
        );
        assert_eq!(mailer.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn serves_openapi_document() {
        let response = app(None, RecordingMailer::succeeding())
            .oneshot(
                Request::builder()
                    .uri("/api-doc/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["paths"]["/send-email"].is_object());
    }
}
