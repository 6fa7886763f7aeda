use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Best-effort operation log.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, event: &str, details: Value) -> Result<()>;
}

/// Writes audit events to the `audit` tracing target.
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn record(&self, event: &str, details: Value) -> Result<()> {
        tracing::info!(target: "audit", event, details = %details, "audit");
        Ok(())
    }
}
