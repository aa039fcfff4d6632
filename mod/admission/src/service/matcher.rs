//! Policy matching: which policy, if any, authorizes a subject's access to
//! a resource right now.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use flowgate_sql::Value;

use crate::model::{ConditionProperty, EvaluationContext, Policy, Subject};
use crate::service::condition::{self, Verdict};
use crate::service::{AdmissionError, AdmissionService};

impl AdmissionService {
    /// Find a policy that authorizes `subject` to reach `resource_id`.
    ///
    /// Candidates are the account's non-deleted, non-disabled policies for
    /// the resource whose group the subject's actor is a member of, with the
    /// resource itself not deleted. Group membership is always required —
    /// admin visibility shortcuts apply to listing, never to admission.
    ///
    /// - no candidates at all ⇒ `NotFound` (no grant path exists)
    /// - candidates but none satisfied ⇒ `Forbidden` carrying the
    ///   de-duplicated first violated property of each failing policy
    /// - one or more satisfied ⇒ the first in ascending row-id order wins;
    ///   the returned boundary is the earliest condition boundary of the
    ///   winning policy (`None` when no condition is time-based)
    pub fn find_authorizing_policy(
        &self,
        resource_id: &str,
        subject: &Subject,
        ctx: &EvaluationContext,
    ) -> Result<(Policy, Option<DateTime<Utc>>), AdmissionError> {
        let rows = self
            .sql
            .query(
                "SELECT p.data FROM policies p
                 JOIN resources r ON r.id = p.resource_id AND r.account_id = p.account_id
                 JOIN memberships m ON m.group_id = p.actor_group_id
                 WHERE p.account_id = ?1
                   AND p.resource_id = ?2
                   AND m.actor_id = ?3
                   AND p.deleted_at IS NULL
                   AND p.disabled_at IS NULL
                   AND r.deleted_at IS NULL
                 ORDER BY p.id",
                &[
                    Value::Text(subject.account_id.clone()),
                    Value::Text(resource_id.to_string()),
                    Value::Text(subject.actor_id.clone()),
                ],
            )
            .map_err(|e| AdmissionError::Storage(e.to_string()))?;

        if rows.is_empty() {
            return Err(AdmissionError::NotFound(format!(
                "no policy grants access to resource '{}'",
                resource_id
            )));
        }

        let mut violated: BTreeSet<ConditionProperty> = BTreeSet::new();

        for row in &rows {
            let data = row
                .get_str("data")
                .ok_or_else(|| AdmissionError::Internal("missing data column".into()))?;
            let policy: Policy = serde_json::from_str(data)
                .map_err(|e| AdmissionError::Internal(e.to_string()))?;

            match evaluate_policy(&policy, ctx) {
                Ok(boundary) => {
                    tracing::debug!(
                        policy_id = %policy.id,
                        resource_id,
                        actor_id = %subject.actor_id,
                        "policy authorizes access"
                    );
                    return Ok((policy, boundary));
                }
                Err(property) => {
                    violated.insert(property);
                }
            }
        }

        Err(AdmissionError::Forbidden {
            violated_properties: violated.into_iter().collect(),
        })
    }
}

/// Evaluate all of a policy's conditions (AND). Returns the earliest
/// non-nil boundary on success, or the first violated property.
fn evaluate_policy(
    policy: &Policy,
    ctx: &EvaluationContext,
) -> Result<Option<DateTime<Utc>>, ConditionProperty> {
    let mut boundary: Option<DateTime<Utc>> = None;

    for cond in &policy.conditions {
        match condition::evaluate(cond, ctx) {
            Verdict::Satisfied { boundary: Some(b) } => {
                boundary = Some(boundary.map_or(b, |cur| cur.min(b)));
            }
            Verdict::Satisfied { boundary: None } => {}
            Verdict::Violated { property } => return Err(property),
        }
    }

    Ok(boundary)
}
