use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use risk_manager::ExitAdvisory;
use serde_json::json;
use signal_engine::{DeliveryChannel, FinalSignal};
use uuid::Uuid;

/// Webhook delivery. An empty URL disables the channel; everything is
/// logged and acknowledged locally so the pipeline behaves the same in
/// dry runs.
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            webhook_url,
        })
    }

    async fn post(&self, payload: serde_json::Value) -> Result<()> {
        if self.webhook_url.is_empty() {
            tracing::debug!("webhook not configured, skipping notification");
            return Ok(());
        }
        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryChannel for WebhookNotifier {
    async fn deliver_signal(&self, signal: &FinalSignal) -> Result<String> {
        let receipt = Uuid::new_v4().to_string();
        let c = &signal.ranked.candidate;
        self.post(json!({
            "kind": "signal",
            "receipt": receipt,
            "symbol": c.symbol,
            "direction": c.direction.as_str(),
            "strategy": c.strategy_id,
            "stars": signal.ranked.stars,
            "confirmation": signal.ranked.confirmation.as_str(),
            "entry": c.entry_price,
            "stop": c.stop_price,
            "target_1": c.target_1,
            "target_2": c.target_2,
            "quantity": signal.quantity,
            "rationale": c.rationale,
            "expires_at": signal.expires_at.to_rfc3339(),
        }))
        .await?;
        Ok(receipt)
    }

    async fn deliver_advisory(&self, advisory: &ExitAdvisory) -> Result<()> {
        self.post(json!({
            "kind": "advisory",
            "trade_id": advisory.trade_id,
            "symbol": advisory.symbol,
            "price": advisory.price,
            "message": advisory.message,
        }))
        .await
    }

    async fn deliver_alert(&self, message: &str) -> Result<()> {
        self.post(json!({
            "kind": "alert",
            "message": message,
        }))
        .await
    }
}
