//! Route queries.

use mirage_core::db::unix_timestamp;

use super::db::{ControlDatabase, DatabaseError};
use super::models::Route;

impl ControlDatabase {
    /// All routes of a machine, advertised or not.
    pub async fn get_machine_routes(&self, machine_id: i64) -> Result<Vec<Route>, DatabaseError> {
        let routes =
            sqlx::query_as::<_, Route>("SELECT * FROM routes WHERE machine_id = ? ORDER BY id")
                .bind(machine_id)
                .fetch_all(self.pool())
                .await?;
        Ok(routes)
    }

    async fn set_route_enabled(&self, route_id: i64, enabled: bool) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE routes SET enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled)
            .bind(unix_timestamp())
            .bind(route_id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Route {route_id}")));
        }
        Ok(())
    }

    /// Enable one route.
    pub async fn enable_route(&self, route_id: i64) -> Result<(), DatabaseError> {
        self.set_route_enabled(route_id, true).await
    }

    /// Disable one route.
    pub async fn disable_route(&self, route_id: i64) -> Result<(), DatabaseError> {
        self.set_route_enabled(route_id, false).await
    }

    /// Enable every route of a machine whose prefix is in `prefixes`.
    ///
    /// Prefixes the machine has no route for are ignored. Returns the number
    /// of routes touched.
    pub async fn enable_routes(
        &self,
        machine_id: i64,
        prefixes: &[String],
    ) -> Result<u64, DatabaseError> {
        let mut touched = 0;
        for prefix in prefixes {
            let result = sqlx::query(
                "UPDATE routes SET enabled = 1, updated_at = ? WHERE machine_id = ? AND prefix = ?",
            )
            .bind(unix_timestamp())
            .bind(machine_id)
            .bind(prefix)
            .execute(self.pool())
            .await?;
            touched += result.rows_affected();
        }
        Ok(touched)
    }

    /// Mark a prefix as advertised, creating the route if it is new.
    ///
    /// An existing route keeps its `enabled` flag.
    pub async fn upsert_advertised_route(
        &self,
        machine_id: i64,
        prefix: &str,
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp();
        sqlx::query(
            "INSERT INTO routes (machine_id, prefix, advertised, enabled, created_at, updated_at) \
             VALUES (?, ?, 1, 0, ?, ?) \
             ON CONFLICT(machine_id, prefix) DO UPDATE SET advertised = 1, updated_at = excluded.updated_at",
        )
        .bind(machine_id)
        .bind(prefix)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Mark a route as no longer advertised.
    pub async fn withdraw_route(&self, route_id: i64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE routes SET advertised = 0, updated_at = ? WHERE id = ?")
            .bind(unix_timestamp())
            .bind(route_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
