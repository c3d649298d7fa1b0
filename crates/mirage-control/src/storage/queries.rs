//! Organization, user, and pre-auth key queries.

use mirage_core::db::unix_timestamp;

use super::db::{ControlDatabase, DatabaseError};
use super::models::{Organization, PreAuthKey, User};

impl ControlDatabase {
    // =========================================================================
    // Organization queries
    // =========================================================================

    /// Create a new organization.
    pub async fn create_organization(
        &self,
        name: &str,
        magic_dns_domain: &str,
        expiry_days: i64,
    ) -> Result<Organization, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "INSERT INTO organizations (name, magic_dns_domain, expiry_days, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(magic_dns_domain)
        .bind(expiry_days)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_organization(result.last_insert_rowid()).await
    }

    /// Get an organization by ID.
    pub async fn get_organization(&self, id: i64) -> Result<Organization, DatabaseError> {
        sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Organization {id}")))
    }

    /// Get an organization by name.
    pub async fn get_organization_by_name(&self, name: &str) -> Result<Organization, DatabaseError> {
        sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Organization {name}")))
    }

    /// Replace an organization's ACL policy document.
    pub async fn update_acl_policy(&self, id: i64, policy_json: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE organizations SET acl_policy = ? WHERE id = ?")
            .bind(policy_json)
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // User queries
    // =========================================================================

    /// Create a new user inside an organization.
    pub async fn create_user(
        &self,
        organization_id: i64,
        name: &str,
        display_name: &str,
        password_hash: &str,
    ) -> Result<User, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "INSERT INTO users (organization_id, name, display_name, password_hash, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(organization_id)
        .bind(name)
        .bind(display_name)
        .bind(password_hash)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_user(result.last_insert_rowid()).await
    }

    /// Get a user by ID.
    pub async fn get_user(&self, id: i64) -> Result<User, DatabaseError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("User {id}")))
    }

    /// Get a user by login name.
    pub async fn get_user_by_name(&self, name: &str) -> Result<User, DatabaseError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("User with name {name}")))
    }

    // =========================================================================
    // Pre-auth key queries
    // =========================================================================

    /// Store a pre-auth key. `acl_tags` is a JSON array of tag names.
    pub async fn create_preauth_key(
        &self,
        key: &str,
        user_id: i64,
        reusable: bool,
        ephemeral: bool,
        expiration: i64,
        acl_tags: &[String],
    ) -> Result<PreAuthKey, DatabaseError> {
        let now = unix_timestamp();
        let tags = serde_json::to_string(acl_tags).map_err(|e| DatabaseError::Query(e.to_string()))?;

        sqlx::query(
            "INSERT INTO preauth_keys (key, user_id, reusable, ephemeral, expiration, acl_tags, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(key)
        .bind(user_id)
        .bind(reusable)
        .bind(ephemeral)
        .bind(expiration)
        .bind(&tags)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_preauth_key(key).await
    }

    /// Get a pre-auth key.
    pub async fn get_preauth_key(&self, key: &str) -> Result<PreAuthKey, DatabaseError> {
        sqlx::query_as::<_, PreAuthKey>("SELECT * FROM preauth_keys WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound("Pre-auth key".into()))
    }

    /// Consume a single-use key. Returns false if it was already used.
    pub async fn mark_preauth_key_used(&self, key: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE preauth_keys SET used = 1 WHERE key = ? AND used = 0")
            .bind(key)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
