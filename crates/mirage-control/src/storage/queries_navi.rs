//! Navi node queries.

use mirage_core::db::unix_timestamp;

use super::db::{ControlDatabase, DatabaseError};
use super::models::NaviNode;

impl ControlDatabase {
    /// Provision a Navi node. Its key stays empty until first registration.
    pub async fn create_navi_node(
        &self,
        id: &str,
        org_id: i64,
        hostname: &str,
    ) -> Result<NaviNode, DatabaseError> {
        sqlx::query("INSERT INTO navi_nodes (id, org_id, hostname, created_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(org_id)
            .bind(hostname)
            .bind(unix_timestamp())
            .execute(self.pool())
            .await?;

        self.get_navi_node(id).await
    }

    /// Get a Navi node by ID.
    pub async fn get_navi_node(&self, id: &str) -> Result<NaviNode, DatabaseError> {
        sqlx::query_as::<_, NaviNode>("SELECT * FROM navi_nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Navi node {id}")))
    }

    /// Bind `navi_key` to the node if unbound, or confirm it if already bound to it.
    ///
    /// A single conditional update: of several concurrent first registrants
    /// exactly one sees `true`. Returns false, leaving the row untouched, when
    /// a different key is bound or the node does not exist.
    pub async fn bind_navi_key(&self, id: &str, navi_key: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE navi_nodes SET navi_key = ? WHERE id = ? AND (navi_key = '' OR navi_key = ?)",
        )
        .bind(navi_key)
        .bind(id)
        .bind(navi_key)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
