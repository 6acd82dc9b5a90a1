//! Schedule records are written straight to the store; a running `serve`
//! daemon picks them up on its next sync pass.

use crate::output::{fmt_opt, print_json, print_table};
use crate::settings::Settings;
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Args;
use sendpost_core::sendpost as sendpost_ops;

#[derive(Args)]
pub struct ScheduleArgs {
    pub sendpost_id: u64,
    /// Planned start time (RFC 3339, e.g. 2026-05-01T09:00:00Z)
    #[arg(long)]
    pub at: DateTime<Utc>,
}

pub fn plan(settings: &Settings, args: ScheduleArgs, json: bool) -> anyhow::Result<()> {
    let store = settings.open_store()?;
    let schedule = sendpost_ops::plan(&*store, args.sendpost_id, args.at)
        .with_context(|| format!("failed to schedule sendpost {}", args.sendpost_id))?;

    if json {
        print_json(&schedule)
    } else {
        println!(
            "Scheduled sendpost {} for {} (schedule {})",
            schedule.sendpost_id,
            schedule.planned_at.to_rfc3339(),
            schedule.id
        );
        Ok(())
    }
}

pub fn unplan(settings: &Settings, sendpost_id: u64, json: bool) -> anyhow::Result<()> {
    let store = settings.open_store()?;
    let removed = sendpost_ops::unplan(&*store, sendpost_id)?;

    if json {
        return print_json(&serde_json::json!({
            "sendpost_id": sendpost_id,
            "removed": removed,
        }));
    }
    match removed {
        Some(s) => println!("Unscheduled sendpost {sendpost_id} (schedule {})", s.id),
        None => println!("Sendpost {sendpost_id} has no pending schedule"),
    }
    Ok(())
}

pub fn list(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let store = settings.open_store()?;
    let schedules = store.list_schedules()?;

    if json {
        return print_json(&schedules);
    }
    if schedules.is_empty() {
        println!("No schedules.");
        return Ok(());
    }
    let rows = schedules
        .iter()
        .map(|s| {
            vec![
                s.id.to_string(),
                s.sendpost_id.to_string(),
                s.planned_at.to_rfc3339(),
                fmt_opt(s.started_at.map(|t| t.to_rfc3339())),
                fmt_opt(s.completed_at.map(|t| t.to_rfc3339())),
            ]
        })
        .collect();
    print_table(&["ID", "SENDPOST", "PLANNED", "STARTED", "COMPLETED"], rows);
    Ok(())
}
