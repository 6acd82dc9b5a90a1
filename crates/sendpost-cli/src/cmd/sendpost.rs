use crate::cmd::{parse_params, parse_value};
use crate::output::{fmt_opt, fmt_params, print_json, print_table};
use crate::settings::Settings;
use anyhow::Context;
use clap::Subcommand;
use sendpost_core::{graph, sendpost as sendpost_ops, Sendpost, Store};

#[derive(Subcommand)]
pub enum SendpostSubcommand {
    /// Create a sendpost
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Global parameter as key=value (repeatable)
        #[arg(long = "param", short = 'p')]
        params: Vec<String>,
    },
    /// List all sendposts
    List,
    /// Show a sendpost with its stage chain
    Show { id: u64 },
    /// Copy a sendpost and all of its stages
    Copy {
        id: u64,
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Extra global parameter for the copy as key=value (repeatable)
        #[arg(long = "param", short = 'p')]
        params: Vec<String>,
    },
    /// Delete a sendpost with its stages and schedules
    Delete { id: u64 },
    /// Set one global parameter
    ParamSet { id: u64, key: String, value: String },
    /// Remove one global parameter
    ParamRm { id: u64, key: String },
}

pub fn run(settings: &Settings, subcmd: SendpostSubcommand, json: bool) -> anyhow::Result<()> {
    let store = settings.open_store()?;
    let store = &*store;
    match subcmd {
        SendpostSubcommand::Create {
            name,
            description,
            params,
        } => {
            let params = parse_params(&params)?;
            let created = sendpost_ops::create(store, &name, description, params)
                .context("failed to create sendpost")?;
            report(&created, json, "Created")
        }
        SendpostSubcommand::List => list(store, json),
        SendpostSubcommand::Show { id } => show(store, id, json),
        SendpostSubcommand::Copy {
            id,
            name,
            description,
            params,
        } => {
            let extra = parse_params(&params)?;
            let copy = sendpost_ops::copy(store, id, &name, description, extra)
                .with_context(|| format!("failed to copy sendpost {id}"))?;
            report(&copy, json, "Copied to")
        }
        SendpostSubcommand::Delete { id } => {
            sendpost_ops::delete(store, id).with_context(|| format!("failed to delete sendpost {id}"))?;
            if json {
                print_json(&serde_json::json!({ "id": id, "deleted": true }))
            } else {
                println!("Deleted sendpost {id}");
                Ok(())
            }
        }
        SendpostSubcommand::ParamSet { id, key, value } => {
            let updated = sendpost_ops::set_parameter(store, id, &key, parse_value(&value))
                .with_context(|| format!("sendpost {id} not updated"))?;
            report(&updated, json, "Updated")
        }
        SendpostSubcommand::ParamRm { id, key } => {
            let updated = sendpost_ops::remove_parameter(store, id, &key)
                .with_context(|| format!("sendpost {id} not updated"))?;
            report(&updated, json, "Updated")
        }
    }
}

fn report(sp: &Sendpost, json: bool, verb: &str) -> anyhow::Result<()> {
    if json {
        print_json(sp)
    } else {
        println!("{verb} sendpost {} '{}'", sp.id, sp.name);
        Ok(())
    }
}

fn list(store: &dyn Store, json: bool) -> anyhow::Result<()> {
    let sendposts = store.list_sendposts()?;
    if json {
        return print_json(&sendposts);
    }
    if sendposts.is_empty() {
        println!("No sendposts.");
        return Ok(());
    }
    let rows = sendposts
        .iter()
        .map(|sp| {
            vec![
                sp.id.to_string(),
                sp.name.clone(),
                sp.state.to_string(),
                fmt_opt(sp.first_stage_id),
                fmt_params(&sp.global_parameters),
            ]
        })
        .collect();
    print_table(&["ID", "NAME", "STATE", "FIRST", "PARAMETERS"], rows);
    Ok(())
}

fn show(store: &dyn Store, id: u64, json: bool) -> anyhow::Result<()> {
    let sp = store
        .get_sendpost(id)
        .with_context(|| format!("sendpost {id} not found"))?;
    let chain = graph::chain(store, id)?;

    if json {
        return print_json(&serde_json::json!({ "sendpost": sp, "stages": chain }));
    }

    println!("Sendpost {}: {}", sp.id, sp.name);
    if let Some(desc) = &sp.description {
        println!("  {desc}");
    }
    println!("State:      {}", sp.state);
    println!("Parameters: {}", fmt_params(&sp.global_parameters));
    if chain.is_empty() {
        println!("Stages:     (none)");
        return Ok(());
    }
    println!("Stages:");
    for stage in &chain {
        println!(
            "  [{}] {} {} ({}){}",
            stage.id,
            stage.stage_type,
            stage.deployment_id,
            stage.state,
            if stage.blocked { " blocked" } else { "" }
        );
        if stage.is_parallel() {
            for child in graph::children(store, stage.id)? {
                println!(
                    "      └ [{}] {} {} ({})",
                    child.id, child.stage_type, child.deployment_id, child.state
                );
            }
        }
    }
    Ok(())
}
