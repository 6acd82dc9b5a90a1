use crate::cmd::parse_params;
use crate::output::{fmt_opt, fmt_params, print_json, print_table};
use crate::settings::Settings;
use anyhow::{bail, Context};
use clap::Subcommand;
use prefect_client::PrefectClient;
use sendpost_core::{graph, Stage, StageExecutor, StageType, Store};

#[derive(Subcommand)]
pub enum StageSubcommand {
    /// Add a stage to a sendpost's chain
    Add {
        sendpost_id: u64,
        deployment_id: String,
        /// sequential, parallel or observer
        #[arg(long = "type", short = 't', default_value = "sequential")]
        stage_type: String,
        /// Insert after this stage (default: make it the first stage)
        #[arg(long)]
        after: Option<u64>,
        /// Stage parameter as key=value (repeatable)
        #[arg(long = "param", short = 'p')]
        params: Vec<String>,
    },
    /// Add a child to a parallel stage
    AddChild {
        parent_id: u64,
        deployment_id: String,
        #[arg(long = "type", short = 't', default_value = "sequential")]
        stage_type: String,
        #[arg(long = "param", short = 'p')]
        params: Vec<String>,
    },
    /// List the stage chain of a sendpost
    List { sendpost_id: u64 },
    /// Delete a stage (children of a parallel stage go with it)
    Rm { id: u64 },
    /// Toggle the blocked flag of a stage
    Block { id: u64 },
    /// Replace the parameters of a stage
    Params {
        id: u64,
        #[arg(long = "param", short = 'p')]
        params: Vec<String>,
    },
    /// Fetch the default parameters of a deployment from the workflow API
    DeploymentParams { deployment_id: String },
}

pub fn run(settings: &Settings, subcmd: StageSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        StageSubcommand::DeploymentParams { deployment_id } => {
            deployment_params(settings, &deployment_id, json)
        }
        other => manage(&*settings.open_store()?, other, json),
    }
}

fn manage(store: &dyn Store, subcmd: StageSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        StageSubcommand::Add {
            sendpost_id,
            deployment_id,
            stage_type,
            after,
            params,
        } => {
            let mut stage = Stage::new(
                sendpost_id,
                parse_type(&stage_type)?,
                deployment_id,
                parse_params(&params)?,
            );
            store
                .get_sendpost(sendpost_id)
                .with_context(|| format!("sendpost {sendpost_id} not found"))?;
            graph::insert_stage(store, &mut stage, after).context("failed to add stage")?;
            report(&stage, json, "Added")
        }
        StageSubcommand::AddChild {
            parent_id,
            deployment_id,
            stage_type,
            params,
        } => {
            let parent = store
                .get_stage(parent_id)
                .with_context(|| format!("stage {parent_id} not found"))?;
            let mut stage = Stage::new(
                parent.sendpost_id,
                parse_type(&stage_type)?,
                deployment_id,
                parse_params(&params)?,
            );
            graph::add_child(store, parent_id, &mut stage).context("failed to add child stage")?;
            report(&stage, json, "Added")
        }
        StageSubcommand::List { sendpost_id } => list(store, sendpost_id, json),
        StageSubcommand::Rm { id } => {
            graph::delete_stage(store, id).with_context(|| format!("failed to delete stage {id}"))?;
            if json {
                print_json(&serde_json::json!({ "id": id, "deleted": true }))
            } else {
                println!("Deleted stage {id}");
                Ok(())
            }
        }
        StageSubcommand::Block { id } => {
            let blocked = graph::toggle_blocked(store, id)
                .with_context(|| format!("stage {id} not found"))?;
            if json {
                print_json(&serde_json::json!({ "id": id, "blocked": blocked }))
            } else {
                println!(
                    "Stage {id} {}",
                    if blocked { "blocked" } else { "unblocked" }
                );
                Ok(())
            }
        }
        StageSubcommand::Params { id, params } => {
            let stage = graph::set_parameters(store, id, parse_params(&params)?)
                .with_context(|| format!("stage {id} not updated"))?;
            report(&stage, json, "Updated")
        }
        StageSubcommand::DeploymentParams { .. } => {
            bail!("deployment parameters are read from the workflow API, not the store")
        }
    }
}

fn parse_type(raw: &str) -> anyhow::Result<StageType> {
    match raw.to_ascii_lowercase().as_str() {
        "sequential" | "parallel" | "observer" => Ok(StageType::parse(raw)),
        _ => bail!("unknown stage type '{raw}' (expected sequential, parallel or observer)"),
    }
}

fn report(stage: &Stage, json: bool, verb: &str) -> anyhow::Result<()> {
    if json {
        print_json(stage)
    } else {
        println!(
            "{verb} stage {} ({} {})",
            stage.id, stage.stage_type, stage.deployment_id
        );
        Ok(())
    }
}

fn list(store: &dyn Store, sendpost_id: u64, json: bool) -> anyhow::Result<()> {
    let mut stages = Vec::new();
    for stage in graph::chain(store, sendpost_id)? {
        let children = if stage.is_parallel() {
            graph::children(store, stage.id)?
        } else {
            Vec::new()
        };
        stages.push((stage, children));
    }

    if json {
        let entries: Vec<_> = stages
            .iter()
            .map(|(stage, children)| serde_json::json!({ "stage": stage, "children": children }))
            .collect();
        return print_json(&entries);
    }
    if stages.is_empty() {
        println!("No stages.");
        return Ok(());
    }

    let mut rows = Vec::new();
    for (stage, children) in &stages {
        rows.push(row(stage, ""));
        rows.extend(children.iter().map(|c| row(c, "  ")));
    }
    print_table(
        &["ID", "TYPE", "DEPLOYMENT", "STATE", "NEXT", "BLOCKED", "PARAMETERS"],
        rows,
    );
    Ok(())
}

fn row(stage: &Stage, indent: &str) -> Vec<String> {
    vec![
        format!("{indent}{}", stage.id),
        stage.stage_type.to_string(),
        stage.deployment_id.clone(),
        stage.state.to_string(),
        fmt_opt(stage.next_stage_id),
        if stage.blocked { "yes" } else { "no" }.to_string(),
        fmt_params(&stage.parameters),
    ]
}

fn deployment_params(settings: &Settings, deployment_id: &str, json: bool) -> anyhow::Result<()> {
    let client = PrefectClient::new(&settings.config.executor)?;
    let rt = tokio::runtime::Runtime::new()?;
    let params = rt
        .block_on(client.deployment_parameters(deployment_id))
        .with_context(|| format!("failed to fetch deployment {deployment_id}"))?;

    if json {
        print_json(&params)
    } else {
        println!("{}", fmt_params(&params));
        Ok(())
    }
}
