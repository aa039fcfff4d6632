//! Condition evaluation: one predicate against a request context.
//!
//! Evaluation is pure — the context carries the `now` instant, so outcomes
//! are deterministic. Recurring weekly windows are parsed once into
//! [`DayWindow`] and evaluated in the window's own timezone.

use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use ipnet::IpNet;

use crate::model::{Condition, ConditionOperator, ConditionProperty, EvaluationContext};
use crate::service::AdmissionError;

/// Outcome of evaluating one condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The condition holds. `boundary` is the soonest UTC instant it stops
    /// holding, when the condition is time-based; membership conditions
    /// have no boundary.
    Satisfied {
        boundary: Option<DateTime<Utc>>,
    },
    /// The condition does not hold for the named property.
    Violated {
        property: ConditionProperty,
    },
}

impl Verdict {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Verdict::Satisfied { .. })
    }
}

/// Evaluate one condition against a request context.
///
/// A condition's `values` are OR'd; a value that fails to parse is skipped
/// (creation-time validation rejects malformed values, this guards rows
/// written before validation tightened).
pub fn evaluate(condition: &Condition, ctx: &EvaluationContext) -> Verdict {
    match condition.operator {
        ConditionOperator::IsIn => membership(condition, ctx, true),
        ConditionOperator::IsNotIn => membership(condition, ctx, false),
        ConditionOperator::IsInCidr => evaluate_cidr(condition, ctx),
        ConditionOperator::IsInDayOfWeekTimeRanges => evaluate_day_windows(condition, ctx),
    }
}

/// `is_in` / `is_not_in`: membership of the context property in `values`.
/// A property absent from the context violates the condition either way —
/// membership cannot be proven or disproven without a value.
fn membership(condition: &Condition, ctx: &EvaluationContext, want_member: bool) -> Verdict {
    let violated = Verdict::Violated {
        property: condition.property,
    };

    let is_member = match condition.property {
        ConditionProperty::RemoteIp => {
            let Some(ip) = ctx.remote_ip else {
                return violated;
            };
            // Compare parsed addresses where possible so "::1" and
            // "0:0:0:0:0:0:0:1" are the same member.
            condition
                .values
                .iter()
                .any(|v| v.parse::<IpAddr>().map(|p| p == ip).unwrap_or(false))
        }
        ConditionProperty::RemoteIpLocationRegion => {
            let Some(region) = ctx.remote_ip_location_region.as_deref() else {
                return violated;
            };
            condition.values.iter().any(|v| v == region)
        }
        ConditionProperty::ProviderId => {
            let Some(provider_id) = ctx.provider_id.as_deref() else {
                return violated;
            };
            condition.values.iter().any(|v| v == provider_id)
        }
        ConditionProperty::CurrentUtcDatetime => {
            let now = ctx.now.to_rfc3339();
            condition.values.iter().any(|v| v == &now)
        }
    };

    if is_member == want_member {
        Verdict::Satisfied { boundary: None }
    } else {
        violated
    }
}

/// `is_in_cidr`: the context address is contained in any of the CIDRs.
fn evaluate_cidr(condition: &Condition, ctx: &EvaluationContext) -> Verdict {
    let Some(ip) = ctx.remote_ip else {
        return Verdict::Violated {
            property: condition.property,
        };
    };

    for value in &condition.values {
        match parse_cidr(value) {
            Ok(net) if net.contains(&ip) => {
                return Verdict::Satisfied { boundary: None };
            }
            Ok(_) => {}
            Err(_) => {
                tracing::warn!(%value, "skipping unparseable CIDR condition value");
            }
        }
    }

    Verdict::Violated {
        property: condition.property,
    }
}

/// Parse a CIDR value. A bare address is accepted as a host network.
fn parse_cidr(value: &str) -> Result<IpNet, AdmissionError> {
    if let Ok(net) = value.parse::<IpNet>() {
        return Ok(net);
    }
    value
        .parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|_| AdmissionError::Validation(format!("invalid CIDR '{}'", value)))
}

/// `is_in_day_of_week_time_ranges`: the instant falls inside a recurring
/// weekly window. Values are OR'd; evaluation stops at the first matching
/// window and its end (converted back to UTC) is the boundary.
fn evaluate_day_windows(condition: &Condition, ctx: &EvaluationContext) -> Verdict {
    for value in &condition.values {
        let window = match DayWindow::parse(value) {
            Ok(w) => w,
            Err(_) => {
                tracing::warn!(%value, "skipping unparseable day-of-week condition value");
                continue;
            }
        };
        if let Some(boundary) = window.match_at(ctx.now) {
            return Verdict::Satisfied { boundary };
        }
    }

    Verdict::Violated {
        property: condition.property,
    }
}

/// One time range within a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowRange {
    /// The literal `true`: the whole day matches.
    AllDay,
    /// Inclusive start and end times.
    Between(NaiveTime, NaiveTime),
}

/// A parsed `DAY/RANGE[,RANGE...]/TZ` value: a recurring weekly window in
/// a specific timezone.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DayWindow {
    weekday: Weekday,
    ranges: Vec<WindowRange>,
    tz: Tz,
}

impl DayWindow {
    /// Parse a `DAY/RANGE[,RANGE...]/TZ` value.
    ///
    /// `DAY` is one of `M T W R F S U` (Monday..Sunday), each `RANGE` is
    /// `HH:MM:SS-HH:MM:SS` (inclusive) or the literal `true`, and `TZ` is an
    /// IANA timezone name (which may itself contain slashes).
    pub(crate) fn parse(value: &str) -> Result<Self, AdmissionError> {
        let mut parts = value.splitn(3, '/');
        let (Some(day), Some(ranges), Some(tz)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(AdmissionError::Validation(format!(
                "day-of-week value '{}' must have the shape DAY/RANGES/TZ",
                value
            )));
        };

        let weekday = match day {
            "M" => Weekday::Mon,
            "T" => Weekday::Tue,
            "W" => Weekday::Wed,
            "R" => Weekday::Thu,
            "F" => Weekday::Fri,
            "S" => Weekday::Sat,
            "U" => Weekday::Sun,
            other => {
                return Err(AdmissionError::Validation(format!(
                    "unknown day-of-week '{}' (expected one of M T W R F S U)",
                    other
                )));
            }
        };

        let mut parsed_ranges = Vec::new();
        for range in ranges.split(',') {
            if range == "true" {
                parsed_ranges.push(WindowRange::AllDay);
                continue;
            }
            let Some((start, end)) = range.split_once('-') else {
                return Err(AdmissionError::Validation(format!(
                    "time range '{}' must be HH:MM:SS-HH:MM:SS or 'true'",
                    range
                )));
            };
            let start = NaiveTime::parse_from_str(start, "%H:%M:%S").map_err(|_| {
                AdmissionError::Validation(format!("invalid start time '{}'", start))
            })?;
            let end = NaiveTime::parse_from_str(end, "%H:%M:%S")
                .map_err(|_| AdmissionError::Validation(format!("invalid end time '{}'", end)))?;
            if start > end {
                return Err(AdmissionError::Validation(format!(
                    "time range '{}' starts after it ends",
                    range
                )));
            }
            parsed_ranges.push(WindowRange::Between(start, end));
        }
        if parsed_ranges.is_empty() {
            return Err(AdmissionError::Validation(format!(
                "day-of-week value '{}' has no time ranges",
                value
            )));
        }

        let tz = Tz::from_str(tz)
            .map_err(|_| AdmissionError::Validation(format!("unknown timezone '{}'", tz)))?;

        Ok(Self {
            weekday,
            ranges: parsed_ranges,
            tz,
        })
    }

    /// If `now` falls inside this window, return the window's boundary: the
    /// UTC instant the matched range ends. An all-day range ends at the next
    /// local midnight. A boundary landing in a DST gap yields `None`.
    fn match_at(&self, now: DateTime<Utc>) -> Option<Option<DateTime<Utc>>> {
        let local = now.with_timezone(&self.tz);
        if local.weekday() != self.weekday {
            return None;
        }

        let time = local.time();
        for range in &self.ranges {
            match range {
                WindowRange::AllDay => {
                    let midnight = local
                        .date_naive()
                        .succ_opt()
                        .and_then(|d| d.and_hms_opt(0, 0, 0));
                    return Some(midnight.and_then(|m| self.local_to_utc(m)));
                }
                WindowRange::Between(start, end) => {
                    if *start <= time && time <= *end {
                        let boundary = local.date_naive().and_time(*end);
                        return Some(self.local_to_utc(boundary));
                    }
                }
            }
        }
        None
    }

    /// Convert a local wall-clock instant back to UTC. An ambiguous instant
    /// (DST fold) resolves to the earlier of the two; an instant inside a
    /// DST gap has no UTC equivalent.
    fn local_to_utc(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Validate condition shape: non-empty values, operator/property pairing,
/// and parseability of every CIDR and day-of-week value.
pub fn validate_conditions(conditions: &[Condition]) -> Result<(), AdmissionError> {
    for condition in conditions {
        if condition.values.is_empty() {
            return Err(AdmissionError::Validation(format!(
                "condition on {} has no values",
                condition.property
            )));
        }

        match condition.operator {
            ConditionOperator::IsInCidr => {
                if condition.property != ConditionProperty::RemoteIp {
                    return Err(AdmissionError::Validation(format!(
                        "is_in_cidr applies only to remote_ip, not {}",
                        condition.property
                    )));
                }
                for value in &condition.values {
                    parse_cidr(value)?;
                }
            }
            ConditionOperator::IsInDayOfWeekTimeRanges => {
                if condition.property != ConditionProperty::CurrentUtcDatetime {
                    return Err(AdmissionError::Validation(format!(
                        "is_in_day_of_week_time_ranges applies only to current_utc_datetime, not {}",
                        condition.property
                    )));
                }
                for value in &condition.values {
                    DayWindow::parse(value)?;
                }
            }
            ConditionOperator::IsIn | ConditionOperator::IsNotIn => {}
        }
    }

    Ok(())
}
