//! CLI command implementations
//!
//! The administrative surface: wallet lifecycle, nonce administration,
//! breaker control, monitoring, and alert checks. Authentication is the
//! caller's concern; results print as JSON, failures as sanitized
//! envelopes with full detail in the logs and error log table.

use anyhow::{Context, Result};
use serde::Serialize;
use uuid::Uuid;

use crate::alert::{Alert, AlertSeverity};
use crate::app::AppContext;
use crate::config::Config;
use crate::custody::WalletStatus;
use crate::error::Error;
use crate::ledger::Address;

/// Print a success as pretty JSON, or report and surface a failure
async fn render<T: Serialize>(ctx: &AppContext, result: crate::error::Result<T>) -> Result<()> {
    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(err) => fail(ctx, err).await,
    }
}

async fn fail(ctx: &AppContext, err: Error) -> Result<()> {
    let correlation_id = Uuid::new_v4().to_string();
    let envelope = ctx.reporter.report(&err, &correlation_id, None).await;
    eprintln!("{}", serde_json::to_string_pretty(&envelope)?);
    anyhow::bail!("{} ({})", envelope.user_message, envelope.code)
}

fn parse_address(raw: &str) -> crate::error::Result<Address> {
    Address::parse(raw)
}

// Wallet commands

pub async fn wallet_create(
    ctx: &AppContext,
    wallet_id: &str,
    metadata: Option<String>,
    actor: &str,
) -> Result<()> {
    let metadata = metadata
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .context("metadata must be valid JSON")?;

    render(ctx, ctx.custody.create_wallet(wallet_id, metadata, actor).await).await
}

pub async fn wallet_show(ctx: &AppContext, wallet_id: &str) -> Result<()> {
    render(ctx, ctx.custody.get_wallet(wallet_id).await).await
}

pub async fn wallet_list(
    ctx: &AppContext,
    status: Option<String>,
    limit: i64,
    offset: i64,
) -> Result<()> {
    let status = match status.as_deref() {
        None => None,
        Some(raw) => match WalletStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return fail(
                    ctx,
                    Error::Validation {
                        field: "status".to_string(),
                        message: format!("unknown status '{}'", raw),
                    },
                )
                .await
            }
        },
    };

    render(ctx, ctx.custody.list_wallets(status, limit, offset).await).await
}

pub async fn wallet_rotate(ctx: &AppContext, wallet_id: &str, actor: &str) -> Result<()> {
    render(ctx, ctx.custody.rotate_wallet(wallet_id, actor).await).await
}

pub async fn wallet_revoke(
    ctx: &AppContext,
    wallet_id: &str,
    reason: &str,
    actor: &str,
) -> Result<()> {
    match ctx.custody.revoke_wallet(wallet_id, reason, actor).await {
        Ok(()) => {
            println!("{}", serde_json::json!({ "revoked": wallet_id }));
            Ok(())
        }
        Err(err) => fail(ctx, err).await,
    }
}

pub async fn wallet_audit(ctx: &AppContext, wallet_id: &str, limit: i64) -> Result<()> {
    render(ctx, ctx.custody.list_audit_log(wallet_id, limit).await).await
}

// Nonce commands

pub async fn nonce_status(ctx: &AppContext, address: &str) -> Result<()> {
    let address = match parse_address(address) {
        Ok(address) => address,
        Err(err) => return fail(ctx, err).await,
    };
    render(ctx, ctx.nonces.get_status(&address).await).await
}

pub async fn nonce_reset(ctx: &AppContext, address: &str) -> Result<()> {
    let address = match parse_address(address) {
        Ok(address) => address,
        Err(err) => return fail(ctx, err).await,
    };
    render(ctx, ctx.nonces.reset_nonce(&address).await).await
}

pub async fn nonce_clear(ctx: &AppContext, address: &str) -> Result<()> {
    let address = match parse_address(address) {
        Ok(address) => address,
        Err(err) => return fail(ctx, err).await,
    };
    match ctx.nonces.clear(&address).await {
        Ok(()) => {
            println!("{}", serde_json::json!({ "cleared": address.as_str() }));
            Ok(())
        }
        Err(err) => fail(ctx, err).await,
    }
}

// Breaker commands

pub async fn breaker_status(ctx: &AppContext) -> Result<()> {
    render(ctx, ctx.breaker.status().await).await
}

pub async fn breaker_reset(ctx: &AppContext, actor: &str) -> Result<()> {
    if let Err(err) = ctx.breaker.reset().await {
        return fail(ctx, err).await;
    }

    // Leave an audit trail of the manual intervention.
    let alert = Alert::new(
        "Circuit Breaker Reset",
        &format!(
            "Breaker '{}' manually reset to closed by {}",
            ctx.breaker.name(),
            actor
        ),
        AlertSeverity::Info,
        "circuit_breaker_reset",
    );
    if let Err(err) = ctx.alerts.send_alert(alert).await {
        return fail(ctx, err).await;
    }
    if let Err(err) = ctx.alerts.flush_all().await {
        return fail(ctx, err).await;
    }

    render(ctx, ctx.breaker.status().await).await
}

// Monitor commands

pub async fn monitor_run(ctx: &AppContext) -> Result<()> {
    render(ctx, ctx.monitor.run_monitoring_cycle().await).await
}

pub async fn monitor_watch(ctx: &AppContext) -> Result<()> {
    ctx.monitor.run_forever().await;
    Ok(())
}

pub async fn monitor_summary(ctx: &AppContext) -> Result<()> {
    render(ctx, ctx.monitor.summary().await).await
}

pub async fn retry_tx(ctx: &AppContext, tx_id: &str) -> Result<()> {
    render(ctx, ctx.submitter.retry_transaction(tx_id).await).await
}

// Alert commands

pub async fn alert_test(ctx: &AppContext) -> Result<()> {
    match ctx.alerts.send_test_alert().await {
        Ok(delivered) => {
            println!("{}", serde_json::json!({ "delivered": delivered }));
            Ok(())
        }
        Err(err) => fail(ctx, err).await,
    }
}

pub async fn alert_recent(
    ctx: &AppContext,
    severity: Option<String>,
    category: Option<String>,
    limit: i64,
) -> Result<()> {
    let severity = match severity.as_deref() {
        None => None,
        Some(raw) => match AlertSeverity::parse(raw) {
            Some(severity) => Some(severity),
            None => {
                return fail(
                    ctx,
                    Error::Validation {
                        field: "severity".to_string(),
                        message: format!("unknown severity '{}'", raw),
                    },
                )
                .await
            }
        },
    };

    render(
        ctx,
        ctx.alerts
            .recent_alerts(severity, category.as_deref(), limit)
            .await,
    )
    .await
}

pub async fn alert_stats(ctx: &AppContext, hours: i64) -> Result<()> {
    render(ctx, ctx.alerts.alert_stats(hours).await).await
}

// Config

pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&config.masked())?);
    Ok(())
}
