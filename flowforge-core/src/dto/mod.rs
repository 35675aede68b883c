//! Data transfer objects for the persistence gateway and its callers

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::TriggerKind;

/// Request to create a new project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProject {
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub repo_url: String,
    pub branch: Option<String>,
    pub build_path: Option<String>,
    pub deploy_path: Option<String>,
    pub credential_id: Option<Uuid>,
}

/// Request to update an existing project. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProject {
    pub name: Option<String>,
    pub description: Option<String>,
    pub repo_url: Option<String>,
    pub branch: Option<String>,
    pub build_path: Option<String>,
    pub deploy_path: Option<String>,
    pub credential_id: Option<Option<Uuid>>,
    pub status: Option<String>,
}

/// Request to create a new SSH key credential.
///
/// This is the only write path that carries the private half; it is never
/// returned by any read operation afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSshKey {
    pub owner_id: Uuid,
    pub name: String,
    pub public_key: String,
    pub private_key: String,
    pub host: Option<String>,
    pub port: Option<i32>,
    pub username: Option<String>,
}

/// Request to create a new pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipeline {
    pub project_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// The declarative spec document, stored verbatim after validation.
    pub spec: String,
    pub trigger: TriggerKind,
    pub cron_expr: Option<String>,
}

/// Pagination request used by list accessors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Page {
    pub page: i64,
    pub page_size: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self { page: 1, page_size: 20 }
    }
}
