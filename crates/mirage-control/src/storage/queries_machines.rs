//! Machine queries.

use mirage_core::db::unix_timestamp;

use super::db::{ControlDatabase, DatabaseError};
use super::models::Machine;

/// Parameters for inserting a newly activated machine.
#[derive(Debug, Clone)]
pub struct NewMachine<'a> {
    pub node_key: &'a str,
    pub machine_key: &'a str,
    pub user_id: i64,
    pub organization_id: i64,
    pub ipv4: &'a str,
    pub ipv6: &'a str,
    pub hostname: &'a str,
    pub given_name: &'a str,
    pub ephemeral: bool,
    pub forced_tags: &'a [String],
    pub host_info: &'a str,
    pub expiry: i64,
}

fn tags_json(tags: &[String]) -> Result<String, DatabaseError> {
    serde_json::to_string(tags).map_err(|e| DatabaseError::Query(e.to_string()))
}

impl ControlDatabase {
    /// Insert a machine. A duplicate node key or address yields `Conflict`.
    pub async fn create_machine(&self, params: &NewMachine<'_>) -> Result<Machine, DatabaseError> {
        let now = unix_timestamp();
        let tags = tags_json(params.forced_tags)?;

        let result = sqlx::query(
            "INSERT INTO machines (node_key, machine_key, user_id, organization_id, ipv4, ipv6, \
             hostname, given_name, ephemeral, forced_tags, host_info, expiry, last_seen, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(params.node_key)
        .bind(params.machine_key)
        .bind(params.user_id)
        .bind(params.organization_id)
        .bind(params.ipv4)
        .bind(params.ipv6)
        .bind(params.hostname)
        .bind(params.given_name)
        .bind(params.ephemeral)
        .bind(&tags)
        .bind(params.host_info)
        .bind(params.expiry)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_machine(result.last_insert_rowid()).await
    }

    /// Get a machine by ID.
    pub async fn get_machine(&self, id: i64) -> Result<Machine, DatabaseError> {
        sqlx::query_as::<_, Machine>("SELECT * FROM machines WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Machine {id}")))
    }

    /// Get a machine by its bare-hex node key.
    pub async fn get_machine_by_node_key(&self, node_key: &str) -> Result<Machine, DatabaseError> {
        sqlx::query_as::<_, Machine>("SELECT * FROM machines WHERE node_key = ?")
            .bind(node_key)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Machine with node key {node_key}")))
    }

    /// List every machine.
    pub async fn list_machines(&self) -> Result<Vec<Machine>, DatabaseError> {
        let machines = sqlx::query_as::<_, Machine>("SELECT * FROM machines ORDER BY id")
            .fetch_all(self.pool())
            .await?;
        Ok(machines)
    }

    /// List the machines of one organization.
    pub async fn list_machines_by_org(&self, organization_id: i64) -> Result<Vec<Machine>, DatabaseError> {
        let machines = sqlx::query_as::<_, Machine>(
            "SELECT * FROM machines WHERE organization_id = ? ORDER BY id",
        )
        .bind(organization_id)
        .fetch_all(self.pool())
        .await?;
        Ok(machines)
    }

    /// List the machines owned by one user.
    pub async fn list_machines_by_user(&self, user_id: i64) -> Result<Vec<Machine>, DatabaseError> {
        let machines =
            sqlx::query_as::<_, Machine>("SELECT * FROM machines WHERE user_id = ? ORDER BY id")
                .bind(user_id)
                .fetch_all(self.pool())
                .await?;
        Ok(machines)
    }

    /// Every `(ipv4, ipv6)` pair currently assigned.
    pub async fn allocated_addresses(&self) -> Result<Vec<(String, String)>, DatabaseError> {
        let rows = sqlx::query_as::<_, (String, String)>("SELECT ipv4, ipv6 FROM machines")
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }

    /// Bind the transport key of a machine that has none yet.
    ///
    /// Returns false when a key is already bound, whatever its value.
    pub async fn bind_machine_key(&self, id: i64, machine_key: &str) -> Result<bool, DatabaseError> {
        let result =
            sqlx::query("UPDATE machines SET machine_key = ? WHERE id = ? AND machine_key = ''")
                .bind(machine_key)
                .bind(id)
                .execute(self.pool())
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Replace the node key of a machine (key rotation).
    pub async fn update_node_key(&self, id: i64, node_key: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE machines SET node_key = ? WHERE id = ?")
            .bind(node_key)
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Machine {id}")));
        }
        Ok(())
    }

    /// Record fresh host info and mark the machine as seen.
    pub async fn update_host_info(
        &self,
        id: i64,
        hostname: &str,
        host_info: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE machines SET hostname = ?, host_info = ?, last_seen = ? WHERE id = ?")
            .bind(hostname)
            .bind(host_info)
            .bind(unix_timestamp())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Record the endpoints a machine reports.
    pub async fn update_endpoints(&self, id: i64, endpoints: &[String]) -> Result<(), DatabaseError> {
        let json = tags_json(endpoints)?;
        sqlx::query("UPDATE machines SET endpoints = ? WHERE id = ?")
            .bind(&json)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Update `last_seen` to now.
    pub async fn touch_machine(&self, id: i64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE machines SET last_seen = ? WHERE id = ?")
            .bind(unix_timestamp())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Set the key expiry of a machine. 0 disables expiry.
    pub async fn refresh_machine_expiry(&self, id: i64, expiry: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE machines SET expiry = ? WHERE id = ?")
            .bind(expiry)
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Machine {id}")));
        }
        Ok(())
    }

    /// Persist the forced tag set of a machine verbatim.
    pub async fn set_tags(&self, id: i64, tags: &[String]) -> Result<(), DatabaseError> {
        let json = tags_json(tags)?;
        let result = sqlx::query("UPDATE machines SET forced_tags = ? WHERE id = ?")
            .bind(&json)
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Machine {id}")));
        }
        Ok(())
    }

    /// Set the display name of a machine.
    pub async fn rename_machine(
        &self,
        id: i64,
        given_name: &str,
        auto_gen_name: bool,
    ) -> Result<(), DatabaseError> {
        let result =
            sqlx::query("UPDATE machines SET given_name = ?, auto_gen_name = ? WHERE id = ?")
                .bind(given_name)
                .bind(auto_gen_name)
                .bind(id)
                .execute(self.pool())
                .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Machine {id}")));
        }
        Ok(())
    }

    /// Whether another machine in the organization already uses `given_name`.
    pub async fn given_name_taken(
        &self,
        organization_id: i64,
        given_name: &str,
        except_id: i64,
    ) -> Result<bool, DatabaseError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM machines WHERE organization_id = ? AND given_name = ? AND id != ?",
        )
        .bind(organization_id)
        .bind(given_name)
        .bind(except_id)
        .fetch_one(self.pool())
        .await?;

        Ok(count > 0)
    }

    /// Delete a machine and, by cascade, its routes.
    pub async fn hard_delete_machine(&self, id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM machines WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
