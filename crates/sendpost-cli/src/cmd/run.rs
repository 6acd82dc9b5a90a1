use crate::output::print_json;
use crate::settings::Settings;
use anyhow::{anyhow, Context};
use prefect_client::PrefectClient;
use sendpost_core::StateType;
use sendpost_engine::{ChannelObserver, Engine};
use std::sync::Arc;
use tokio_stream::StreamExt;

/// Run one sendpost in the foreground, printing every notification label.
pub fn run(settings: &Settings, sendpost_id: u64, json: bool) -> anyhow::Result<()> {
    let store = settings.open_store()?;
    let executor = Arc::new(PrefectClient::new(&settings.config.executor)?);
    let engine = Engine::new(store, executor, &settings.config.engine);

    // Single-threaded so the run cannot make progress before the observer
    // is attached.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let (state, labels) = rt.block_on(async {
        let ticket = engine
            .start_run(sendpost_id)
            .await
            .with_context(|| format!("failed to start sendpost {sendpost_id}"))?;

        let (observer, mut frames) = ChannelObserver::new(256);
        if let Err(e) = engine.subscribe(sendpost_id, observer).await {
            tracing::warn!(sendpost_id, error = %e, "progress will not be streamed");
        }

        let mut labels = Vec::new();
        while let Some(label) = frames.next().await {
            if !json {
                println!("{label}");
            }
            labels.push(label);
        }
        anyhow::Ok((ticket.wait().await, labels))
    })?;

    if json {
        print_json(&serde_json::json!({
            "sendpost_id": sendpost_id,
            "state": state,
            "events": labels,
        }))?;
    }

    if state == StateType::Completed {
        Ok(())
    } else {
        Err(anyhow!("sendpost {sendpost_id} finished {state}"))
    }
}
