pub mod authorize;
pub mod condition;
pub mod entities;
pub mod lifecycle;
pub mod matcher;
pub mod revoke;
pub mod schema;

#[cfg(test)]
pub(crate) mod fixtures;

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use flowgate_events::EventBus;
use flowgate_sql::{SQLStore, Value};

use crate::events::Event;
use crate::model::{ConditionProperty, Permission};

/// Admission service error type.
///
/// `Forbidden` and `Unauthorized` carry enough structure for operator
/// diagnosis (which conditions failed, which permissions are missing)
/// without revealing whether an unrelated resource exists.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// No candidate policy had all conditions satisfied. Carries the
    /// de-duplicated union of the first violated property per failing policy.
    #[error("forbidden: conditions violated for {violated_properties:?}")]
    Forbidden {
        violated_properties: Vec<ConditionProperty>,
    },

    /// The subject lacks a required permission.
    #[error("unauthorized: missing permissions {missing_permissions:?}")]
    Unauthorized {
        missing_permissions: Vec<Permission>,
    },

    #[error("validation: {0}")]
    Validation(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl From<AdmissionError> for flowgate_core::ServiceError {
    fn from(e: AdmissionError) -> Self {
        let msg = e.to_string();
        match e {
            AdmissionError::NotFound(m) => flowgate_core::ServiceError::NotFound(m),
            AdmissionError::Conflict(m) => flowgate_core::ServiceError::Conflict(m),
            AdmissionError::Forbidden { .. } => {
                flowgate_core::ServiceError::PermissionDenied(msg)
            }
            AdmissionError::Unauthorized { .. } => {
                flowgate_core::ServiceError::Unauthorized(msg)
            }
            AdmissionError::Validation(m) => flowgate_core::ServiceError::Validation(m),
            AdmissionError::Storage(m) => flowgate_core::ServiceError::Storage(m),
            AdmissionError::Internal(m) => flowgate_core::ServiceError::Internal(m),
        }
    }
}

/// Configuration for the admission service.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Per-topic event backlog for slow subscribers.
    pub event_buffer: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self { event_buffer: 256 }
    }
}

/// The admission service. Stateless relative to the store: holds the storage
/// backend, the event bus, and configuration, never per-request state.
pub struct AdmissionService {
    pub(crate) sql: Arc<dyn SQLStore + Send + Sync>,
    pub(crate) events: EventBus<Event>,
    pub(crate) config: AdmissionConfig,
}

impl AdmissionService {
    /// Create a new AdmissionService, initializing the DB schema.
    pub fn new(
        sql: Arc<dyn SQLStore + Send + Sync>,
        config: AdmissionConfig,
    ) -> Result<Arc<Self>, AdmissionError> {
        schema::init_schema(sql.as_ref())?;
        let events = EventBus::new(config.event_buffer);
        Ok(Arc::new(Self {
            sql,
            events,
            config,
        }))
    }

    /// The event bus operations broadcast on. Subscribe to topics from
    /// [`crate::events::topics`].
    pub fn events(&self) -> &EventBus<Event> {
        &self.events
    }

    /// The configuration the service was built with.
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Publish a batch of (topic, event) pairs, in order. Called only after
    /// the store writes that produced them have committed.
    pub(crate) fn publish_all(&self, pending: Vec<(String, Event)>) {
        for (topic, event) in pending {
            self.events.publish(&topic, event);
        }
    }

    // ── Generic record helpers (JSON document + indexed columns) ──
    //
    // These take the store explicitly so the same code path serves both
    // direct calls (`self.sql.as_ref()`) and statements inside an open
    // transaction.

    /// Insert a record as JSON into a table with indexed columns.
    pub(crate) fn insert_record<T: Serialize>(
        &self,
        sql: &dyn SQLStore,
        table: &str,
        id: &str,
        record: &T,
        indexes: &[(&str, Value)],
    ) -> Result<(), AdmissionError> {
        let json = serde_json::to_string(record)
            .map_err(|e| AdmissionError::Internal(e.to_string()))?;

        let mut cols = vec!["id", "data"];
        let mut placeholders = vec!["?1".to_string(), "?2".to_string()];
        let mut params = vec![Value::Text(id.to_string()), Value::Text(json)];

        for (i, (col, val)) in indexes.iter().enumerate() {
            let idx = i + 3;
            cols.push(col);
            placeholders.push(format!("?{}", idx));
            params.push(val.clone());
        }

        let stmt = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            cols.join(", "),
            placeholders.join(", "),
        );

        sql.exec(&stmt, &params).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("UNIQUE constraint") {
                AdmissionError::Conflict(msg)
            } else {
                AdmissionError::Storage(msg)
            }
        })?;

        Ok(())
    }

    /// Get a record by id, deserializing the JSON `data` column.
    pub(crate) fn get_record<T: DeserializeOwned>(
        &self,
        sql: &dyn SQLStore,
        table: &str,
        id: &str,
    ) -> Result<T, AdmissionError> {
        let stmt = format!("SELECT data FROM {} WHERE id = ?1", table);
        let rows = sql
            .query(&stmt, &[Value::Text(id.to_string())])
            .map_err(|e| AdmissionError::Storage(e.to_string()))?;
        let row = rows
            .first()
            .ok_or_else(|| AdmissionError::NotFound(format!("{}/{}", table, id)))?;
        let data = row
            .get_str("data")
            .ok_or_else(|| AdmissionError::Internal("missing data column".into()))?;
        serde_json::from_str(data).map_err(|e| AdmissionError::Internal(e.to_string()))
    }

    /// Update a record's JSON data and indexed columns.
    pub(crate) fn update_record<T: Serialize>(
        &self,
        sql: &dyn SQLStore,
        table: &str,
        id: &str,
        record: &T,
        indexes: &[(&str, Value)],
    ) -> Result<(), AdmissionError> {
        let json = serde_json::to_string(record)
            .map_err(|e| AdmissionError::Internal(e.to_string()))?;

        let mut sets = vec!["data = ?1".to_string()];
        let mut params: Vec<Value> = vec![Value::Text(json)];

        for (i, (col, val)) in indexes.iter().enumerate() {
            let idx = i + 2;
            sets.push(format!("{} = ?{}", col, idx));
            params.push(val.clone());
        }

        let id_idx = params.len() + 1;
        params.push(Value::Text(id.to_string()));

        let stmt = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            table,
            sets.join(", "),
            id_idx,
        );

        let affected = sql
            .exec(&stmt, &params)
            .map_err(|e| AdmissionError::Storage(e.to_string()))?;

        if affected == 0 {
            return Err(AdmissionError::NotFound(format!("{}/{}", table, id)));
        }

        Ok(())
    }
}
