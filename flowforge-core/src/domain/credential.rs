//! Credential (SSH key) domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named RSA keypair used by the source fetcher and SSH remoting.
///
/// The private half is write-only over any read API: it is set at creation
/// and never serialized back out. The optional host/port/username triple is
/// the default target for connectivity tests and remote execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKey {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub public_key: String,
    /// Secret half. Never returned over a read API.
    #[serde(skip_serializing, default)]
    pub private_key: String,
    pub host: Option<String>,
    pub port: i32,
    pub username: String,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl SshKey {
    pub const DEFAULT_PORT: i32 = 22;
    pub const DEFAULT_USERNAME: &'static str = "root";
}
