//! Interfaces to the editor's backend services.
//!
//! Only the render backend has a network implementation here; project
//! storage and waveform peaks are consumed through traits so the session can
//! be driven by in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::protocol::RenderSettings;
use crate::render::{RenderRequest, RenderStatus};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Backend rejected request: {0}")]
    Rejected(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Render status as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderStatusReport {
    pub status: RenderStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub output_url: Option<String>,
    #[serde(default, alias = "error_message")]
    pub error: Option<String>,
}

#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Submit a render. Returns the backend's render id.
    async fn start_render(&self, request: &RenderRequest) -> Result<String, ServiceError>;

    async fn status(&self, render_id: &str) -> Result<RenderStatusReport, ServiceError>;
}

/// Persisted project content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectDocument {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub duration: Option<f64>,
    pub transcript: serde_json::Value,
    pub subtitle_styles: serde_json::Value,
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get(&self, project_id: &str) -> Result<ProjectDocument, ServiceError>;

    async fn update(&self, project: &ProjectDocument) -> Result<(), ServiceError>;

    async fn delete(&self, project_id: &str) -> Result<(), ServiceError>;

    /// Store a media file. Returns its URL.
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, ServiceError>;
}

/// Peak data for the waveform surface. The session does not consume it.
#[async_trait]
pub trait WaveformProvider: Send + Sync {
    async fn peaks(&self, project_id: &str) -> Result<Vec<f32>, ServiceError>;
}

/// [`ProjectStore`] held in memory.
#[derive(Default)]
pub struct InMemoryProjectStore {
    projects: RwLock<HashMap<String, ProjectDocument>>,
    uploads: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, project: ProjectDocument) {
        self.projects.write().await.insert(project.id.clone(), project);
    }

    pub async fn len(&self) -> usize {
        self.projects.read().await.len()
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn get(&self, project_id: &str) -> Result<ProjectDocument, ServiceError> {
        self.projects
            .read()
            .await
            .get(project_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("project {project_id}")))
    }

    async fn update(&self, project: &ProjectDocument) -> Result<(), ServiceError> {
        let mut projects = self.projects.write().await;
        match projects.get_mut(&project.id) {
            Some(existing) => {
                *existing = project.clone();
                Ok(())
            }
            None => Err(ServiceError::NotFound(format!("project {}", project.id))),
        }
    }

    async fn delete(&self, project_id: &str) -> Result<(), ServiceError> {
        self.projects
            .write()
            .await
            .remove(project_id)
            .map(|_| ())
            .ok_or_else(|| ServiceError::NotFound(format!("project {project_id}")))
    }

    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, ServiceError> {
        self.uploads.write().await.insert(file_name.to_string(), bytes);
        Ok(format!("memory://{file_name}"))
    }
}

/// HTTP client for the render endpoints of the editor API.
pub struct HttpRenderBackend {
    client: reqwest::Client,
    base_url: String,
    user_id: String,
}

#[derive(Deserialize)]
struct StartRenderResponse {
    success: bool,
    #[serde(default)]
    render_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct RenderStatusResponse {
    success: bool,
    #[serde(default)]
    render: Option<RenderStatusReport>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpRenderBackend {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, user_id)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
        }
    }

    fn render_url(&self, project_id: &str) -> String {
        format!("{}/projects/{project_id}/render", self.base_url)
    }

    fn status_url(&self, render_id: &str) -> String {
        format!("{}/renders/{render_id}", self.base_url)
    }
}

#[async_trait]
impl RenderBackend for HttpRenderBackend {
    async fn start_render(&self, request: &RenderRequest) -> Result<String, ServiceError> {
        let settings: &RenderSettings = &request.settings;
        let response = self
            .client
            .post(self.render_url(&request.project_id))
            .header("X-User-ID", &self.user_id)
            .json(settings)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound(format!("project {}", request.project_id)));
        }
        let body: StartRenderResponse = response.json().await?;
        if !body.success {
            return Err(ServiceError::Rejected(body.error.unwrap_or_else(|| "unknown error".into())));
        }
        body.render_id
            .ok_or_else(|| ServiceError::InvalidResponse("missing render_id".into()))
    }

    async fn status(&self, render_id: &str) -> Result<RenderStatusReport, ServiceError> {
        let response = self
            .client
            .get(self.status_url(render_id))
            .header("X-User-ID", &self.user_id)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound(format!("render {render_id}")));
        }
        let body: RenderStatusResponse = response.json().await?;
        if !body.success {
            return Err(ServiceError::Rejected(body.error.unwrap_or_else(|| "unknown error".into())));
        }
        body.render
            .ok_or_else(|| ServiceError::InvalidResponse("missing render".into()))
    }
}
