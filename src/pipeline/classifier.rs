//! Applies a chosen interaction outcome to a lead.
//!
//! The stage update and the activity append happen in one SQLite
//! transaction: either both land or neither does.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::outcomes::Outcome;
use super::{Activity, ActivityType, InteractionType, Lead, Stage};
use crate::error::ApiError;
use crate::session::manager::CallSummary;
use crate::store::leads::{get_lead, insert_activity, save_lead_state};
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeInput {
    pub lead_id: String,
    pub interaction_type: InteractionType,
    pub outcome: Outcome,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub follow_up_at: Option<DateTime<Utc>>,
    /// When set, the write is rejected unless the lead is still at this version.
    #[serde(default)]
    pub expected_version: Option<i64>,
}

impl OutcomeInput {
    /// Outcome for a call that just ended, carrying its measured duration.
    pub fn for_call(lead_id: impl Into<String>, outcome: Outcome, call: &CallSummary) -> Self {
        Self {
            lead_id: lead_id.into(),
            interaction_type: InteractionType::Call,
            outcome,
            duration_seconds: Some(call.duration_secs as u32),
            notes: None,
            follow_up_at: None,
            expected_version: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeResult {
    pub lead: Lead,
    pub activity: Activity,
    pub stage_changed: bool,
}

fn format_duration(secs: u32) -> String {
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// Human-readable activity text: label, optional call length, optional notes.
pub fn describe(outcome: Outcome, duration: Option<u32>, notes: Option<&str>) -> String {
    let mut text = outcome.label().to_string();
    if let Some(secs) = duration {
        text.push_str(&format!(" ({})", format_duration(secs)));
    }
    if let Some(notes) = notes.map(str::trim).filter(|n| !n.is_empty()) {
        text.push_str(": ");
        text.push_str(notes);
    }
    text
}

fn validate(input: &OutcomeInput) -> Result<(), ApiError> {
    if input.lead_id.trim().is_empty() {
        return Err(ApiError::InvalidArgument("leadId is required".into()));
    }
    if !input.outcome.is_valid_for(input.interaction_type) {
        return Err(ApiError::InvalidArgument(format!(
            "outcome {} is not valid for a {} interaction",
            input.outcome, input.interaction_type
        )));
    }
    if input.duration_seconds.is_some() && input.interaction_type != InteractionType::Call {
        return Err(ApiError::InvalidArgument(
            "durationSeconds only applies to calls".into(),
        ));
    }
    Ok(())
}

fn check_version(lead: &Lead, expected: Option<i64>) -> Result<(), ApiError> {
    match expected {
        Some(v) if v != lead.version => Err(ApiError::Conflict(format!(
            "lead {} is at version {}, expected {}",
            lead.id, lead.version, v
        ))),
        _ => Ok(()),
    }
}

fn ensure_active(lead: &Lead) -> Result<(), ApiError> {
    if lead.is_active {
        Ok(())
    } else {
        Err(ApiError::FailedPrecondition(format!(
            "lead {} is deactivated",
            lead.id
        )))
    }
}

fn lost_race(lead_id: &str) -> ApiError {
    ApiError::Conflict(format!("lead {} was modified concurrently", lead_id))
}

pub fn record_outcome(
    store: &mut Store,
    input: &OutcomeInput,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<OutcomeResult, ApiError> {
    validate(input)?;

    let result = store.with_transaction(|tx| {
        let mut lead = get_lead(tx, &input.lead_id)?
            .ok_or_else(|| ApiError::NotFound(format!("lead {}", input.lead_id)))?;
        ensure_active(&lead)?;
        check_version(&lead, input.expected_version)?;

        let prior_version = lead.version;
        let previous_stage = lead.stage;

        if let Some(stage) = input.outcome.target_stage() {
            lead.stage = stage;
        }
        lead.last_contacted_at = Some(now);
        if let Some(follow_up) = input.follow_up_at {
            lead.next_follow_up_at = Some(follow_up);
        }
        lead.version += 1;
        lead.updated_at = now;

        if !save_lead_state(tx, &lead, prior_version)? {
            return Err(lost_race(&lead.id));
        }

        let activity = Activity {
            id: uuid::Uuid::new_v4().to_string(),
            lead_id: lead.id.clone(),
            activity_type: input.interaction_type.activity_type(),
            description: describe(input.outcome, input.duration_seconds, input.notes.as_deref()),
            outcome: Some(input.outcome.as_str().to_string()),
            duration: input.duration_seconds,
            created_by: actor.to_string(),
            created_at: now,
            scheduled_for: input.follow_up_at,
        };
        insert_activity(tx, &activity)?;

        Ok(OutcomeResult {
            stage_changed: previous_stage != lead.stage,
            lead,
            activity,
        })
    })?;

    log::info!(
        "Recorded {} outcome {} for lead {} (stage {})",
        input.interaction_type,
        input.outcome,
        result.lead.id,
        result.lead.stage
    );
    Ok(result)
}

/// Manual stage change from the pipeline board. Writes a note activity with the
/// transition; setting the current stage again is a no-op.
pub fn set_stage(
    store: &mut Store,
    lead_id: &str,
    stage: Stage,
    expected_version: Option<i64>,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<Lead, ApiError> {
    store.with_transaction(|tx| {
        let mut lead = get_lead(tx, lead_id)?
            .ok_or_else(|| ApiError::NotFound(format!("lead {}", lead_id)))?;
        ensure_active(&lead)?;
        check_version(&lead, expected_version)?;
        if lead.stage == stage {
            return Ok(lead);
        }

        let prior_version = lead.version;
        let previous = lead.stage;
        lead.stage = stage;
        lead.version += 1;
        lead.updated_at = now;
        if !save_lead_state(tx, &lead, prior_version)? {
            return Err(lost_race(lead_id));
        }

        insert_activity(
            tx,
            &note(lead_id, format!("Stage changed from {} to {}", previous, stage), actor, now),
        )?;
        Ok(lead)
    })
}

/// Leads are never deleted, only deactivated.
pub fn deactivate_lead(
    store: &mut Store,
    lead_id: &str,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<Lead, ApiError> {
    store.with_transaction(|tx| {
        let mut lead = get_lead(tx, lead_id)?
            .ok_or_else(|| ApiError::NotFound(format!("lead {}", lead_id)))?;
        if !lead.is_active {
            return Ok(lead);
        }

        let prior_version = lead.version;
        lead.is_active = false;
        lead.version += 1;
        lead.updated_at = now;
        if !save_lead_state(tx, &lead, prior_version)? {
            return Err(lost_race(lead_id));
        }

        insert_activity(tx, &note(lead_id, "Lead deactivated".to_string(), actor, now))?;
        Ok(lead)
    })
}

fn note(lead_id: &str, description: String, actor: &str, now: DateTime<Utc>) -> Activity {
    Activity {
        id: uuid::Uuid::new_v4().to_string(),
        lead_id: lead_id.to_string(),
        activity_type: ActivityType::Note,
        description,
        outcome: None,
        duration: None,
        created_by: actor.to_string(),
        created_at: now,
        scheduled_for: None,
    }
}
