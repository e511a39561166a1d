//! Probe: stream a demo workflow to a collector.
//!
//! Acts as a façade caller of the delivery engine: it builds the
//! `createWorkflow` / `log` / `endWorkflow` envelopes itself and hands the
//! serialized frames to `enqueue`. Useful for smoke-testing a collector
//! deployment end to end.
//!
//! Endpoint and origin come from `BEACON_COLLECTOR_URL` / `BEACON_ORIGIN`,
//! defaulting to the local collector.

use anyhow::Result;
use beacon_client::{ClientConfig, TelemetryClient};
use beacon_wire::{
    clock, BodyType, CreateWorkflowPayload, EndWorkflowPayload, Envelope, LogPayload,
};
use serde_json::json;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("beacon_client=debug".parse()?)
                .add_directive("probe=info".parse()?),
        )
        .init();

    let config = ClientConfig::from_env();
    let client = TelemetryClient::new(config);
    let origin = client.origin().to_string();

    client.connect();

    let workflow_id = Uuid::new_v4().to_string();
    let mut order: u64 = 0;

    info!(%workflow_id, "starting demo workflow");
    enqueue(
        &client,
        Envelope::CreateWorkflow(CreateWorkflowPayload {
            workflow_id: workflow_id.clone(),
            title: "Probe workflow".to_string(),
            description: "Synthetic events emitted by beacon-probe".to_string(),
        }),
    );

    for step in 0..5u64 {
        enqueue(
            &client,
            Envelope::Log(LogPayload {
                workflow_id: workflow_id.clone(),
                message: format!("probe step {step}"),
                body: json!({ "step": step, "value": step * step }),
                body_type: BodyType::Object,
                timestamp: clock::iso_timestamp(),
                client_time: clock::client_time(),
                order,
                origin: origin.clone(),
            }),
        );
        order += 1;
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    enqueue(
        &client,
        Envelope::EndWorkflow(EndWorkflowPayload {
            workflow_id: workflow_id.clone(),
            timestamp: clock::iso_timestamp(),
            client_time: clock::client_time(),
            order,
            origin,
        }),
    );

    info!("demo workflow enqueued, press Ctrl+C to stop");
    signal::ctrl_c().await?;

    client.disconnect();
    // Leave room for the grace period and any deferred drain.
    tokio::time::sleep(Duration::from_secs(3)).await;
    info!("probe stopped");
    Ok(())
}

fn enqueue(client: &TelemetryClient, envelope: Envelope) {
    match envelope.to_json() {
        Ok(frame) => client.enqueue(frame),
        Err(e) => tracing::error!(error = %e, "failed to encode envelope, dropping"),
    }
}
