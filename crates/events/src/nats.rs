//! NATS publisher: one JSON message per action on
//! `<stream_name>.<show_subject|click_subject>`.

use crate::publisher::EventPublisher;
use async_trait::async_trait;
use banner_core::config::NatsConfig;
use banner_core::types::{ActionEvent, ActionKind};
use tracing::{debug, info, warn};

pub struct NatsPublisher {
    client: async_nats::Client,
    show_subject: String,
    click_subject: String,
    node_id: String,
}

impl NatsPublisher {
    /// Connect to the first configured NATS server.
    pub async fn connect(config: &NatsConfig, node_id: String) -> anyhow::Result<Self> {
        let nats_url = config
            .urls
            .first()
            .cloned()
            .unwrap_or_else(|| "nats://localhost:4222".to_string());

        info!(url = %nats_url, "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .max_reconnects(Some(config.max_reconnects))
            .connect(&nats_url)
            .await?;

        info!("NATS connection established");

        Ok(Self {
            client,
            show_subject: config.subject(ActionKind::Show),
            click_subject: config.subject(ActionKind::Click),
            node_id,
        })
    }

    fn subject(&self, kind: ActionKind) -> &str {
        match kind {
            ActionKind::Show => &self.show_subject,
            ActionKind::Click => &self.click_subject,
        }
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: ActionEvent) -> anyhow::Result<()> {
        let subject = self.subject(event.kind).to_string();
        let payload = serde_json::to_vec(&event)?;

        if let Err(e) = self.client.publish(subject.clone(), payload.into()).await {
            metrics::counter!("events.publish_errors").increment(1);
            warn!(subject = %subject, error = %e, "Failed to publish action");
            return Err(e.into());
        }

        metrics::counter!("events.published").increment(1);
        debug!(subject = %subject, event_id = %event.event_id, "Action published");
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.client.flush().await?;
        info!("NATS publisher flushed");
        Ok(())
    }

    fn node_id(&self) -> &str {
        &self.node_id
    }
}
