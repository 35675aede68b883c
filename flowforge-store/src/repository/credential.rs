//! Credential Repository
//!
//! Handles all database operations related to SSH key credentials. Read
//! accessors blank the private half; the engine fetches it explicitly via
//! [`find_by_id_with_secret`] when it needs to authenticate.

use flowforge_core::domain::credential::SshKey;
use flowforge_core::dto::{CreateSshKey, Page};
use sqlx::PgPool;
use uuid::Uuid;

use crate::pagination;

/// Create a new credential. This is the only write path for the private key.
pub async fn create(pool: &PgPool, req: CreateSshKey) -> Result<SshKey, sqlx::Error> {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now();

    let key = SshKey {
        id,
        owner_id: req.owner_id,
        name: req.name.clone(),
        public_key: req.public_key.clone(),
        private_key: String::new(),
        host: req.host.clone(),
        port: req.port.unwrap_or(SshKey::DEFAULT_PORT),
        username: req.username.clone().unwrap_or_else(|| SshKey::DEFAULT_USERNAME.to_string()),
        status: "active".to_string(),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO ssh_keys (
            id, owner_id, name, public_key, private_key,
            host, port, username, status, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(key.id)
    .bind(key.owner_id)
    .bind(&key.name)
    .bind(&key.public_key)
    .bind(&req.private_key)
    .bind(&key.host)
    .bind(key.port)
    .bind(&key.username)
    .bind(&key.status)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(key)
}

/// Find a credential by ID with the private half blanked
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<SshKey>, sqlx::Error> {
    Ok(find_by_id_with_secret(pool, id).await?.map(|mut key| {
        key.private_key = String::new();
        key
    }))
}

/// Find a credential by ID including the private half.
///
/// For engine-internal use only (git transport auth, SSH sessions); the
/// result must never cross a read API boundary.
pub async fn find_by_id_with_secret(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<SshKey>, sqlx::Error> {
    let row = sqlx::query_as::<_, SshKeyRow>(
        r#"
        SELECT id, owner_id, name, public_key, private_key,
               host, port, username, status, created_at, updated_at
        FROM ssh_keys
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List credentials for an owner with private halves blanked
pub async fn list_by_owner(
    pool: &PgPool,
    owner_id: Uuid,
    page: Page,
) -> Result<Vec<SshKey>, sqlx::Error> {
    let (limit, offset) = pagination::limit_offset(page);

    let rows = sqlx::query_as::<_, SshKeyRow>(
        r#"
        SELECT id, owner_id, name, public_key, private_key,
               host, port, username, status, created_at, updated_at
        FROM ssh_keys
        WHERE owner_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(owner_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| {
            let mut key: SshKey = r.into();
            key.private_key = String::new();
            key
        })
        .collect())
}

/// Delete a credential by ID
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM ssh_keys WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct SshKeyRow {
    id: Uuid,
    owner_id: Uuid,
    name: String,
    public_key: String,
    private_key: String,
    host: Option<String>,
    port: i32,
    username: String,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<SshKeyRow> for SshKey {
    fn from(row: SshKeyRow) -> Self {
        SshKey {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            public_key: row.public_key,
            private_key: row.private_key,
            host: row.host,
            port: row.port,
            username: row.username,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
