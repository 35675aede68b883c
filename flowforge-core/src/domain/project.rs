//! Project domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A project ties a source repository to its workspace and credential.
///
/// A project references at most one credential; a project without a
/// credential must use a publicly reachable repository URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub repo_url: String,
    pub branch: String,
    pub build_path: String,
    pub deploy_path: Option<String>,
    /// Optional reference to an SSH key credential used for fetching.
    pub credential_id: Option<Uuid>,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Project {
    /// Default branch used when none is configured.
    pub const DEFAULT_BRANCH: &'static str = "main";
}
