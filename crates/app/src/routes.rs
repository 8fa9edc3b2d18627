//! HTTP routes for analysis, comparison and chat.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::routing::{get, post, MethodRouter};
use axum::{Form, Json, Router};
use docportal_core::{
    ChatIndexParams, ChatIngestor, ChatQueryParams, ComparisonWorkspace, ConversationalRag,
    DocHandler, DocumentAnalyzer, DocumentComparatorLlm, IngestError, IngestorOptions, Metadata,
    PortalError, UploadedFile,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub const SERVICE_NAME: &str = "document-portal";
pub const ENGINE: &str = "conversational-rag";
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    let prefix = state.config.api.prefix.trim_end_matches('/').to_string();

    let mut routes: Vec<(String, MethodRouter<AppState>)> = vec![
        ("/health".into(), get(health)),
        (format!("{prefix}/health"), get(health)),
        (format!("{prefix}/analyze"), post(analyze)),
        (format!("{prefix}/compare"), post(compare)),
        (format!("{prefix}/chat/index"), post(chat_index)),
        (format!("{prefix}/chat/query"), post(chat_query)),
        (format!("{prefix}/metrics/session/:session_id"), get(session_metrics)),
    ];
    routes.dedup_by(|a, b| a.0 == b.0);

    let mut debug_paths = Vec::new();
    if state.config.api.debug {
        debug_paths.push("/debug/openapi".to_string());
        debug_paths.push(format!("{prefix}/debug/openapi"));
        debug_paths.dedup();
    }

    let paths_count = routes.len() + debug_paths.len();
    let mut app = routes
        .into_iter()
        .fold(Router::new(), |app, (path, handler)| app.route(&path, handler));
    for path in debug_paths {
        app = app.route(&path, get(move || debug_openapi(paths_count)));
    }

    app.layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    info!("health check passed");
    Json(json!({ "status": "ok", "service": SERVICE_NAME }))
}

async fn debug_openapi(paths_count: usize) -> Json<Value> {
    Json(json!({ "status": "ok", "paths_count": paths_count.to_string() }))
}

/// Text fields of a form body.
#[derive(Debug, Default)]
struct FormFields(HashMap<String, String>);

impl FormFields {
    fn text(&self, name: &str) -> Option<String> {
        self.0
            .get(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn number<T: FromStr>(&self, name: &str) -> Result<Option<T>, ApiError> {
        self.text(name)
            .map(|raw| {
                raw.parse()
                    .map_err(|_| ApiError::BadRequest(format!("invalid value for {name}: {raw}")))
            })
            .transpose()
    }

    fn flag(&self, name: &str) -> Result<Option<bool>, ApiError> {
        self.text(name)
            .map(|raw| match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(ApiError::BadRequest(format!("invalid value for {name}: {raw}"))),
            })
            .transpose()
    }
}

#[derive(Debug, Default)]
struct UploadForm {
    files: Vec<(String, UploadedFile)>,
    fields: FormFields,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|error| ApiError::BadRequest(format!("invalid multipart body: {error}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let bytes = field.bytes().await.map_err(|error| {
                        ApiError::BadRequest(format!("failed reading upload {file_name}: {error}"))
                    })?;
                    form.files.push((name, UploadedFile::new(file_name, bytes.to_vec())));
                }
                None => {
                    let value = field.text().await.map_err(|error| {
                        ApiError::BadRequest(format!("failed reading field {name}: {error}"))
                    })?;
                    form.fields.0.insert(name, value);
                }
            }
        }
        Ok(form)
    }

    fn take_file(&mut self, field: &str) -> Result<UploadedFile, ApiError> {
        let position = self
            .files
            .iter()
            .position(|(name, _)| name == field)
            .ok_or_else(|| ApiError::BadRequest(format!("missing upload field: {field}")))?;
        Ok(self.files.remove(position).1)
    }

    fn files_named(&self, field: &str) -> Vec<UploadedFile> {
        self.files
            .iter()
            .filter(|(name, _)| name == field)
            .map(|(_, file)| file.clone())
            .collect()
    }
}

async fn analyze(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Metadata>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let file = form.take_file("file")?;
    info!(file = %file.name, "received file for analysis");

    let fail = |error: IngestError| ApiError::from_portal("Analysis", error);
    let handler = DocHandler::new(&state.config, None, None).map_err(fail)?;
    let saved = handler.save_pdf(&file).map_err(fail)?;
    let text = handler.read_pdf(&saved).map_err(fail)?;

    let analyzer = DocumentAnalyzer::new(
        state.llm.clone(),
        &state.prompts,
        state.config.ai.output_parsing,
        state.telemetry.clone(),
    )
    .map_err(|error| ApiError::from_portal("Analysis", error))?;
    let metadata = analyzer
        .analyze_document(&text)
        .await
        .map_err(|error| ApiError::from_portal("Analysis", error))?;

    info!(session_id = %handler.session_id(), "document analysis complete");
    Ok(Json(metadata))
}

async fn compare(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let reference = form.take_file("reference")?;
    let actual = form.take_file("actual")?;
    info!(reference = %reference.name, actual = %actual.name, "comparing files");

    let fail = |error: IngestError| ApiError::from_portal("Comparison", error);
    let workspace = ComparisonWorkspace::new(&state.config, None, None).map_err(fail)?;
    workspace.save_uploaded_files(&reference, &actual).map_err(fail)?;
    let combined = workspace.combine_documents().map_err(fail)?;

    let comparator = DocumentComparatorLlm::new(
        state.llm.clone(),
        &state.prompts,
        state.config.ai.output_parsing,
        state.telemetry.clone(),
    )
    .map_err(|error| ApiError::from_portal("Comparison", error))?;
    let rows = comparator
        .compare_documents(&combined)
        .await
        .map_err(|error| ApiError::from_portal("Comparison", error))?;

    info!(session_id = %workspace.session_id(), rows = rows.len(), "document comparison completed");
    Ok(Json(json!({ "rows": rows, "session_id": workspace.session_id() })))
}

async fn chat_index(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let form = UploadForm::read(multipart).await?;
    let files = form.files_named("files");
    if files.is_empty() {
        return Err(ApiError::BadRequest("at least one file is required in files".into()));
    }

    let defaults = ChatIndexParams::with_defaults(&state.config.ai.retriever);
    let params = ChatIndexParams {
        session_id: form.fields.text("session_id"),
        use_session_dirs: form
            .fields
            .flag("use_session_dirs")?
            .unwrap_or(defaults.use_session_dirs),
        chunk_size: form.fields.number("chunk_size")?.unwrap_or(defaults.chunk_size),
        chunk_overlap: form
            .fields
            .number("chunk_overlap")?
            .unwrap_or(defaults.chunk_overlap),
        k: form.fields.number("k")?.unwrap_or(defaults.k),
    };
    params
        .validate()
        .map_err(|error| ApiError::from_portal("Indexing", error))?;

    let names: Vec<&str> = files.iter().map(|file| file.name.as_str()).collect();
    info!(session_id = ?params.session_id, files = ?names, "indexing chat session");

    let ingestor = ChatIngestor::new(
        &state.config,
        state.embedder.clone(),
        IngestorOptions {
            use_session_dirs: params.use_session_dirs,
            session_id: params.session_id.clone(),
            ..IngestorOptions::default()
        },
    )
    .map_err(|error| ApiError::from_portal("Indexing", error))?;

    let summary = {
        let _guard = state.lock_index(ingestor.index_dir()).await;
        ingestor
            .build_retriever(&files, params.chunk_size, params.chunk_overlap, params.k)
            .await
            .map_err(|error| ApiError::from_portal("Indexing", error))?
    };

    if !summary.embedded_texts.is_empty() {
        state.telemetry.record_embedding_batch(
            state.embedder.model_name(),
            &state.embedding_provider,
            &summary.embedded_texts,
            Some(&summary.session_id),
        );
    }

    info!(
        session_id = %summary.session_id,
        chunks = summary.chunks,
        added = summary.added,
        "index created successfully"
    );
    Ok(Json(json!({
        "session_id": summary.session_id,
        "k": params.k,
        "use_session_dirs": params.use_session_dirs,
    })))
}

async fn chat_query(
    State(state): State<AppState>,
    Form(fields): Form<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let fields = FormFields(fields);
    let params = ChatQueryParams {
        question: fields.text("question").unwrap_or_default(),
        session_id: fields.text("session_id"),
        use_session_dirs: fields.flag("use_session_dirs")?.unwrap_or(true),
        k: fields
            .number("k")?
            .unwrap_or(state.config.ai.retriever.top_k),
    };
    info!(question = %params.question, session_id = ?params.session_id, "received chat query");
    params
        .validate()
        .map_err(|error| ApiError::from_portal("Query", error))?;

    let index_base = state.index_base();
    let index_dir = match (&params.session_id, params.use_session_dirs) {
        (Some(session_id), true) => index_base.join(session_id),
        _ => index_base,
    };
    if !index_dir.is_dir() {
        return Err(ApiError::NotFound(format!(
            "index not found at: {}",
            index_dir.display()
        )));
    }

    let fail = |error: PortalError| ApiError::from_portal("Query", error);
    let mut rag = ConversationalRag::new(
        params.session_id.clone(),
        state.llm.clone(),
        state.embedder.clone(),
        &state.config,
        &state.prompts,
        state.telemetry.clone(),
    )
    .map_err(|error| ApiError::from_portal("Query", error))?;

    {
        let _guard = state.lock_index(&index_dir).await;
        rag.load_retriever_from_index(
            &index_dir,
            Some(params.k),
            Some(&state.config.ai.vector_db.faiss.index_name),
            Some(&state.config.ai.retriever.search_type),
        )
        .map_err(fail)?;
    }
    let answer = rag.invoke(&params.question, &[]).await.map_err(fail)?;

    info!(session_id = ?params.session_id, "chat query handled successfully");
    Ok(Json(json!({
        "answer": answer,
        "session_id": params.session_id,
        "k": params.k,
        "engine": ENGINE,
    })))
}

async fn session_metrics(Path(session_id): Path<String>) -> Json<Value> {
    Json(json!({
        "session_id": session_id,
        "prompt_tokens": 0,
        "completion_tokens": 0,
        "cost_usd": 0.0,
        "detail": "Session aggregation deprecated; rely on Langfuse dashboard",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use docportal_core::{
        AppConfig, CharacterNgramEmbedder, ChatMessage, ChatModel, PromptRegistry, ProviderError,
        Telemetry,
    };
    use http_body_util::BodyExt;
    use std::path::Path as FsPath;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "docportal-test-boundary";

    struct FixedChat(&'static str);

    #[async_trait]
    impl ChatModel for FixedChat {
        fn provider(&self) -> &str {
            "fixed"
        }

        fn model_name(&self) -> &str {
            "fixed-model"
        }

        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, ProviderError> {
            Ok(self.0.to_string())
        }
    }

    enum Part<'a> {
        File(&'a str, &'a str, &'a [u8]),
        Text(&'a str, &'a str),
    }

    fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::File(field, file_name, bytes) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                }
                Part::Text(field, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{field}\"\r\n\r\n{value}")
                            .as_bytes(),
                    );
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn config_in(root: &FsPath) -> AppConfig {
        let mut config = AppConfig::default();
        let dir = |name: &str| root.join(name).display().to_string();
        config.data.storage.document_analysis = dir("analysis");
        config.data.storage.document_compare = dir("compare");
        config.data.storage.document_chat = dir("chat");
        config.ai.vector_db.faiss.index_path = dir("faiss_index");
        config
    }

    fn app(config: AppConfig, answer: &'static str) -> Result<Router, ProviderError> {
        let state = AppState::new(
            config,
            Arc::new(FixedChat(answer)),
            Arc::new(CharacterNgramEmbedder::new(32)),
            "local",
            PromptRegistry::builtin()?,
            Arc::new(Telemetry::disabled()),
        );
        Ok(router(state))
    }

    fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Result<Request<Body>, axum::http::Error> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
    }

    fn form_request(uri: &str, body: &str) -> Result<Request<Body>, axum::http::Error> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
    }

    async fn send(
        app: &Router,
        request: Request<Body>,
    ) -> Result<(StatusCode, Value), Box<dyn std::error::Error>> {
        let response = app.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        Ok((status, serde_json::from_slice(&bytes)?))
    }

    #[tokio::test]
    async fn health_is_served_on_both_paths() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let app = app(config_in(root.path()), "")?;
        for uri in ["/health", "/api/v1/health"] {
            let request = Request::builder().uri(uri).body(Body::empty())?;
            let (status, body) = send(&app, request).await?;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["service"], "document-portal");
        }
        Ok(())
    }

    #[tokio::test]
    async fn debug_route_follows_flag() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let hidden = app(config_in(root.path()), "")?;
        let response = hidden
            .oneshot(Request::builder().uri("/debug/openapi").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let mut config = config_in(root.path());
        config.api.debug = true;
        let shown = app(config, "")?;
        let request = Request::builder().uri("/api/v1/debug/openapi").body(Body::empty())?;
        let (status, body) = send(&shown, request).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paths_count"], "9");
        Ok(())
    }

    #[tokio::test]
    async fn analyze_rejects_non_pdf() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let app = app(config_in(root.path()), "")?;
        let request = multipart_request(
            "/api/v1/analyze",
            &[Part::File("file", "notes.txt", b"plain text")],
        )?;
        let (status, body) = send(&app, request).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap_or_default().contains("only PDF files"));
        Ok(())
    }

    #[tokio::test]
    async fn compare_requires_both_uploads() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let app = app(config_in(root.path()), "")?;
        let request = multipart_request(
            "/api/v1/compare",
            &[Part::File("reference", "a.pdf", b"%PDF-1.4")],
        )?;
        let (status, body) = send(&app, request).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "missing upload field: actual");
        Ok(())
    }

    #[tokio::test]
    async fn index_then_query_session() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let app = app(config_in(root.path()), "Two years.")?;

        let request = multipart_request(
            "/api/v1/chat/index",
            &[
                Part::File(
                    "files",
                    "warranty.txt",
                    b"The warranty lasts two years from the date of purchase.",
                ),
                Part::Text("session_id", "session_a"),
                Part::Text("chunk_size", "200"),
                Part::Text("chunk_overlap", "20"),
                Part::Text("k", "2"),
            ],
        )?;
        let (status, body) = send(&app, request).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_id"], "session_a");
        assert_eq!(body["k"], 2);
        assert_eq!(body["use_session_dirs"], true);
        assert!(root.path().join("faiss_index/session_a/index.faiss").is_file());

        let request = form_request(
            "/api/v1/chat/query",
            "question=How+long+is+the+warranty%3F&session_id=session_a&k=2",
        )?;
        let (status, body) = send(&app, request).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answer"], "Two years.");
        assert_eq!(body["engine"], ENGINE);
        assert_eq!(body["session_id"], "session_a");
        Ok(())
    }

    #[tokio::test]
    async fn index_rejects_overlap_not_below_size() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let app = app(config_in(root.path()), "")?;
        let request = multipart_request(
            "/api/v1/chat/index",
            &[
                Part::File("files", "a.txt", b"text"),
                Part::Text("chunk_size", "100"),
                Part::Text("chunk_overlap", "100"),
            ],
        )?;
        let (status, _) = send(&app, request).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn session_ids_cannot_leave_the_index_base() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let app = app(config_in(root.path()), "")?;

        let request = multipart_request(
            "/api/v1/chat/index",
            &[
                Part::File("files", "a.txt", b"some text to index"),
                Part::Text("session_id", "../escaped"),
            ],
        )?;
        let (status, body) = send(&app, request).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap_or_default().contains("invalid session_id"));
        assert!(!root.path().join("escaped").exists());

        let request = form_request("/api/v1/chat/query", "question=hi&session_id=..%2F..%2Fetc")?;
        let (status, _) = send(&app, request).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn query_validation_and_missing_index() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let app = app(config_in(root.path()), "")?;

        let (status, body) = send(&app, form_request("/api/v1/chat/query", "question=hi")?).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"]
            .as_str()
            .unwrap_or_default()
            .contains("session_id is required"));

        let request = form_request("/api/v1/chat/query", "question=hi&session_id=missing")?;
        let (status, body) = send(&app, request).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["detail"].as_str().unwrap_or_default().starts_with("index not found at:"));
        Ok(())
    }

    #[tokio::test]
    async fn session_metrics_placeholder() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let app = app(config_in(root.path()), "")?;
        let request = Request::builder()
            .uri("/api/v1/metrics/session/session_x")
            .body(Body::empty())?;
        let (status, body) = send(&app, request).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_id"], "session_x");
        assert_eq!(body["prompt_tokens"], 0);
        Ok(())
    }
}
