//! Real-time flow revocation.
//!
//! Scope resolution plus ONE conditional bulk update
//! (`WHERE expires_at > now`) with RETURNING, so concurrent revocations over
//! overlapping scopes can never double-broadcast: only the statement that
//! actually flips a row sees it.

use chrono::{DateTime, Utc};

use flowgate_sql::{Row, SQLStore, Value};

use crate::events::{Event, topics};
use crate::model::Flow;
use crate::service::{AdmissionError, AdmissionService};

/// Which currently-active flows a revocation targets. Every variant is
/// account-scoped: another account's flows are never touched, even on id
/// collision.
#[derive(Debug, Clone, Copy)]
pub enum FlowScope<'a> {
    /// Flows granted under one policy row.
    Policy {
        account_id: &'a str,
        policy_id: &'a str,
    },
    /// Flows granted under any policy of this actor group.
    ActorGroup {
        account_id: &'a str,
        actor_group_id: &'a str,
    },
    /// Flows reaching this resource.
    Resource {
        account_id: &'a str,
        resource_id: &'a str,
    },
    /// Flows from any client owned by this actor.
    Actor {
        account_id: &'a str,
        actor_id: &'a str,
    },
    /// Flows from clients of the actor behind this identity.
    Identity {
        account_id: &'a str,
        identity_id: &'a str,
    },
    /// Flows from one client.
    Client {
        account_id: &'a str,
        client_id: &'a str,
    },
    /// Flows from clients of actors with an identity at this provider.
    Provider {
        account_id: &'a str,
        provider_id: &'a str,
    },
}

impl FlowScope<'_> {
    fn account_id(&self) -> &str {
        match self {
            FlowScope::Policy { account_id, .. }
            | FlowScope::ActorGroup { account_id, .. }
            | FlowScope::Resource { account_id, .. }
            | FlowScope::Actor { account_id, .. }
            | FlowScope::Identity { account_id, .. }
            | FlowScope::Client { account_id, .. }
            | FlowScope::Provider { account_id, .. } => account_id,
        }
    }

    /// SQL predicate over `flows`. `?1` is the expiry instant, `?2` the
    /// account id; the scope value binds at `?3`.
    fn predicate(&self) -> (&'static str, Value) {
        match self {
            FlowScope::Policy { policy_id, .. } => {
                ("policy_id = ?3", Value::Text(policy_id.to_string()))
            }
            FlowScope::ActorGroup { actor_group_id, .. } => (
                "policy_id IN (SELECT id FROM policies
                    WHERE actor_group_id = ?3 AND account_id = ?2)",
                Value::Text(actor_group_id.to_string()),
            ),
            FlowScope::Resource { resource_id, .. } => {
                ("resource_id = ?3", Value::Text(resource_id.to_string()))
            }
            FlowScope::Actor { actor_id, .. } => (
                "client_id IN (SELECT id FROM clients
                    WHERE actor_id = ?3 AND account_id = ?2)",
                Value::Text(actor_id.to_string()),
            ),
            FlowScope::Identity { identity_id, .. } => (
                "client_id IN (SELECT c.id FROM clients c
                    JOIN identities i ON i.actor_id = c.actor_id
                        AND i.account_id = c.account_id
                    WHERE i.id = ?3 AND i.account_id = ?2)",
                Value::Text(identity_id.to_string()),
            ),
            FlowScope::Client { client_id, .. } => {
                ("client_id = ?3", Value::Text(client_id.to_string()))
            }
            FlowScope::Provider { provider_id, .. } => (
                "client_id IN (SELECT c.id FROM clients c
                    JOIN identities i ON i.actor_id = c.actor_id
                        AND i.account_id = c.account_id
                    WHERE i.provider_id = ?3 AND i.account_id = ?2)",
                Value::Text(provider_id.to_string()),
            ),
        }
    }
}

impl AdmissionService {
    /// Force-expire every currently-active flow in scope, then publish one
    /// `ExpireFlow` per newly-expired flow on that flow's topic. Returns the
    /// number of flows expired; a call with nothing eligible is a clean
    /// no-op with no broadcasts.
    pub fn expire_flows_for(&self, scope: FlowScope<'_>) -> Result<u64, AdmissionError> {
        let now = Utc::now();
        let (predicate, scope_param) = scope.predicate();
        let expired = self.expire_flows_where(
            self.sql.as_ref(),
            scope.account_id(),
            predicate,
            &[scope_param],
            now,
        )?;

        let count = expired.len() as u64;
        if count > 0 {
            tracing::info!(count, ?scope, "flows force-expired");
        }

        let mut pending = Vec::with_capacity(expired.len());
        for (flow_id, client_id, resource_id) in expired {
            pending.push((
                topics::flow(&flow_id),
                Event::ExpireFlow {
                    flow_id,
                    client_id,
                    resource_id,
                },
            ));
        }
        self.publish_all(pending);

        Ok(count)
    }

    /// The single conditional bulk update. `predicate` binds its parameters
    /// from `?3` upward (`?1` is the expiry instant, `?2` the account id).
    /// Returns `(flow_id, client_id, resource_id)` for each flipped row;
    /// the caller publishes after its transaction commits.
    pub(crate) fn expire_flows_where(
        &self,
        sql: &dyn SQLStore,
        account_id: &str,
        predicate: &str,
        scope_params: &[Value],
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, String, String)>, AdmissionError> {
        let stmt = format!(
            "UPDATE flows SET expires_at = ?1
             WHERE account_id = ?2 AND expires_at > ?1 AND ({})
             RETURNING id, client_id, resource_id",
            predicate
        );
        let mut params = vec![
            Value::Text(now.to_rfc3339()),
            Value::Text(account_id.to_string()),
        ];
        params.extend_from_slice(scope_params);

        let rows = sql
            .query(&stmt, &params)
            .map_err(|e| AdmissionError::Storage(e.to_string()))?;

        let mut expired = Vec::with_capacity(rows.len());
        for row in &rows {
            let flow_id = required_text(row, "id")?;
            let client_id = required_text(row, "client_id")?;
            let resource_id = required_text(row, "resource_id")?;
            expired.push((flow_id, client_id, resource_id));
        }
        Ok(expired)
    }

    /// Unexpired flows for a client, newest first.
    pub fn list_active_flows(
        &self,
        account_id: &str,
        client_id: &str,
    ) -> Result<Vec<Flow>, AdmissionError> {
        let rows = self
            .sql
            .query(
                "SELECT * FROM flows
                 WHERE account_id = ?1 AND client_id = ?2 AND expires_at > ?3
                 ORDER BY inserted_at DESC",
                &[
                    Value::Text(account_id.to_string()),
                    Value::Text(client_id.to_string()),
                    Value::Text(Utc::now().to_rfc3339()),
                ],
            )
            .map_err(|e| AdmissionError::Storage(e.to_string()))?;

        rows.iter().map(flow_from_row).collect()
    }

    /// Get a flow by id within an account.
    pub fn get_flow(&self, account_id: &str, id: &str) -> Result<Flow, AdmissionError> {
        let rows = self
            .sql
            .query(
                "SELECT * FROM flows WHERE id = ?1 AND account_id = ?2",
                &[Value::Text(id.to_string()), Value::Text(account_id.to_string())],
            )
            .map_err(|e| AdmissionError::Storage(e.to_string()))?;
        let row = rows
            .first()
            .ok_or_else(|| AdmissionError::NotFound(format!("flows/{}", id)))?;
        flow_from_row(row)
    }
}

fn required_text(row: &Row, column: &str) -> Result<String, AdmissionError> {
    row.get_str(column)
        .map(|s| s.to_string())
        .ok_or_else(|| AdmissionError::Internal(format!("missing {} column", column)))
}

fn timestamp(row: &Row, column: &str) -> Result<DateTime<Utc>, AdmissionError> {
    let raw = row
        .get_str(column)
        .ok_or_else(|| AdmissionError::Internal(format!("missing {} column", column)))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AdmissionError::Internal(format!("bad timestamp in {}: {}", column, e)))
}

/// Build a Flow from a columnar row.
fn flow_from_row(row: &Row) -> Result<Flow, AdmissionError> {
    Ok(Flow {
        id: required_text(row, "id")?,
        account_id: required_text(row, "account_id")?,
        policy_id: required_text(row, "policy_id")?,
        client_id: required_text(row, "client_id")?,
        gateway_id: required_text(row, "gateway_id")?,
        resource_id: required_text(row, "resource_id")?,
        client_remote_ip: row.get_str("client_remote_ip").and_then(|s| s.parse().ok()),
        client_user_agent: row.get_str("client_user_agent").map(|s| s.to_string()),
        gateway_remote_ip: row.get_str("gateway_remote_ip").and_then(|s| s.parse().ok()),
        expires_at: timestamp(row, "expires_at")?,
        inserted_at: timestamp(row, "inserted_at")?,
    })
}
