//! Account-scoped entity reads.
//!
//! Entity lifecycle (directory sync, device enrollment, gateway
//! registration) lives outside the admission core; these fetches exclude
//! soft-deleted rows and never cross account boundaries.

use serde::de::DeserializeOwned;

use flowgate_sql::{SQLStore, Value};

use crate::model::{ActorGroup, Resource};
use crate::service::{AdmissionError, AdmissionService};

impl AdmissionService {
    /// Get a record by id within an account, excluding soft-deleted rows.
    pub(crate) fn fetch_scoped<T: DeserializeOwned>(
        &self,
        sql: &dyn SQLStore,
        table: &str,
        account_id: &str,
        id: &str,
    ) -> Result<T, AdmissionError> {
        let stmt = format!(
            "SELECT data FROM {} WHERE id = ?1 AND account_id = ?2 AND deleted_at IS NULL",
            table
        );
        let rows = sql
            .query(
                &stmt,
                &[Value::Text(id.to_string()), Value::Text(account_id.to_string())],
            )
            .map_err(|e| AdmissionError::Storage(e.to_string()))?;
        let row = rows
            .first()
            .ok_or_else(|| AdmissionError::NotFound(format!("{}/{}", table, id)))?;
        let data = row
            .get_str("data")
            .ok_or_else(|| AdmissionError::Internal("missing data column".into()))?;
        serde_json::from_str(data).map_err(|e| AdmissionError::Internal(e.to_string()))
    }

    /// Get a non-deleted resource in the account.
    pub fn get_resource(&self, account_id: &str, id: &str) -> Result<Resource, AdmissionError> {
        self.fetch_scoped(self.sql.as_ref(), "resources", account_id, id)
    }

    /// Get a non-deleted actor group in the account.
    pub fn get_actor_group(
        &self,
        account_id: &str,
        id: &str,
    ) -> Result<ActorGroup, AdmissionError> {
        self.fetch_scoped(self.sql.as_ref(), "actor_groups", account_id, id)
    }

    /// Whether an actor is a member of a group.
    pub fn is_group_member(&self, group_id: &str, actor_id: &str) -> Result<bool, AdmissionError> {
        let rows = self
            .sql
            .query(
                "SELECT 1 AS present FROM memberships WHERE group_id = ?1 AND actor_id = ?2",
                &[Value::Text(group_id.to_string()), Value::Text(actor_id.to_string())],
            )
            .map_err(|e| AdmissionError::Storage(e.to_string()))?;
        Ok(!rows.is_empty())
    }
}
