use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{enum_col, opt_ts_col, ts, ts_col, Store};
use crate::pipeline::{Activity, Lead, NewLead, Stage};

const LEAD_COLUMNS: &str = "id, company_name, contact_name, email, phone, lead_type, stage, tier, \
     estimated_revenue, last_contacted_at, next_follow_up_at, is_active, version, created_at, updated_at";

const ACTIVITY_COLUMNS: &str =
    "id, lead_id, type, description, outcome, duration, created_by, created_at, scheduled_for";

fn lead_from_row(row: &Row<'_>) -> rusqlite::Result<Lead> {
    Ok(Lead {
        id: row.get(0)?,
        company_name: row.get(1)?,
        contact_name: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        lead_type: enum_col(row, 5)?,
        stage: enum_col(row, 6)?,
        tier: row.get(7)?,
        estimated_revenue: row.get(8)?,
        last_contacted_at: opt_ts_col(row, 9)?,
        next_follow_up_at: opt_ts_col(row, 10)?,
        is_active: row.get(11)?,
        version: row.get(12)?,
        created_at: ts_col(row, 13)?,
        updated_at: ts_col(row, 14)?,
    })
}

fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<Activity> {
    Ok(Activity {
        id: row.get(0)?,
        lead_id: row.get(1)?,
        activity_type: enum_col(row, 2)?,
        description: row.get(3)?,
        outcome: row.get(4)?,
        duration: row.get(5)?,
        created_by: row.get(6)?,
        created_at: ts_col(row, 7)?,
        scheduled_for: opt_ts_col(row, 8)?,
    })
}

pub fn insert_lead(conn: &Connection, new: &NewLead, now: DateTime<Utc>) -> rusqlite::Result<Lead> {
    let lead = Lead {
        id: uuid::Uuid::new_v4().to_string(),
        company_name: new.company_name.trim().to_string(),
        contact_name: new.contact_name.clone(),
        email: new.email.clone(),
        phone: new.phone.clone(),
        lead_type: new.lead_type,
        stage: Stage::New,
        tier: new.tier.clone(),
        estimated_revenue: new.estimated_revenue,
        last_contacted_at: None,
        next_follow_up_at: None,
        is_active: true,
        version: 1,
        created_at: now,
        updated_at: now,
    };

    conn.execute(
        &format!(
            "INSERT INTO leads ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            LEAD_COLUMNS
        ),
        params![
            lead.id,
            lead.company_name,
            lead.contact_name,
            lead.email,
            lead.phone,
            lead.lead_type.as_str(),
            lead.stage.as_str(),
            lead.tier,
            lead.estimated_revenue,
            lead.last_contacted_at.as_ref().map(ts),
            lead.next_follow_up_at.as_ref().map(ts),
            lead.is_active,
            lead.version,
            ts(&lead.created_at),
            ts(&lead.updated_at),
        ],
    )?;

    Ok(lead)
}

pub fn get_lead(conn: &Connection, id: &str) -> rusqlite::Result<Option<Lead>> {
    conn.query_row(
        &format!("SELECT {} FROM leads WHERE id = ?1", LEAD_COLUMNS),
        params![id],
        lead_from_row,
    )
    .optional()
}

pub fn list_leads(conn: &Connection, include_inactive: bool) -> rusqlite::Result<Vec<Lead>> {
    let sql = if include_inactive {
        format!("SELECT {} FROM leads ORDER BY company_name", LEAD_COLUMNS)
    } else {
        format!(
            "SELECT {} FROM leads WHERE is_active = 1 ORDER BY company_name",
            LEAD_COLUMNS
        )
    };
    let mut stmt = conn.prepare(&sql)?;
    let leads = stmt
        .query_map([], lead_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(leads)
}

/// Write the mutable pipeline fields of `lead`, but only if the stored row is
/// still at `prior_version`. Returns false when another writer got there first.
pub fn save_lead_state(conn: &Connection, lead: &Lead, prior_version: i64) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE leads
            SET stage = ?1, last_contacted_at = ?2, next_follow_up_at = ?3,
                is_active = ?4, version = ?5, updated_at = ?6
          WHERE id = ?7 AND version = ?8",
        params![
            lead.stage.as_str(),
            lead.last_contacted_at.as_ref().map(ts),
            lead.next_follow_up_at.as_ref().map(ts),
            lead.is_active,
            lead.version,
            ts(&lead.updated_at),
            lead.id,
            prior_version,
        ],
    )?;
    Ok(changed == 1)
}

pub fn insert_activity(conn: &Connection, activity: &Activity) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO lead_activities ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            ACTIVITY_COLUMNS
        ),
        params![
            activity.id,
            activity.lead_id,
            activity.activity_type.as_str(),
            activity.description,
            activity.outcome,
            activity.duration,
            activity.created_by,
            ts(&activity.created_at),
            activity.scheduled_for.as_ref().map(ts),
        ],
    )?;
    Ok(())
}

/// Newest first.
pub fn list_activities(conn: &Connection, lead_id: &str) -> rusqlite::Result<Vec<Activity>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM lead_activities WHERE lead_id = ?1 ORDER BY created_at DESC, rowid DESC",
        ACTIVITY_COLUMNS
    ))?;
    let activities = stmt
        .query_map(params![lead_id], activity_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(activities)
}

impl Store {
    pub fn create_lead(&self, new: &NewLead, now: DateTime<Utc>) -> rusqlite::Result<Lead> {
        insert_lead(self.conn_ref(), new, now)
    }

    pub fn get_lead(&self, id: &str) -> rusqlite::Result<Option<Lead>> {
        get_lead(self.conn_ref(), id)
    }

    pub fn list_leads(&self, include_inactive: bool) -> rusqlite::Result<Vec<Lead>> {
        list_leads(self.conn_ref(), include_inactive)
    }

    pub fn list_activities(&self, lead_id: &str) -> rusqlite::Result<Vec<Activity>> {
        list_activities(self.conn_ref(), lead_id)
    }
}
