//! Headless sync session: follows one user's unread counts and
//! notifications and logs every signal.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use uuid::Uuid;

use helpdesk_sync::alerts::TracingAlerts;
use helpdesk_sync::{Remote, Session, SignalKind, SyncConfig, SyncContext};
use helpdesk_types::models::Role;

const WATCHED: [SignalKind; 8] = [
    SignalKind::CountsChanged,
    SignalKind::MessageReceived,
    SignalKind::MessageDeleted,
    SignalKind::MessageRead,
    SignalKind::NotificationReceived,
    SignalKind::NotificationRead,
    SignalKind::NavigateToTicket,
    SignalKind::TicketChanged,
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "helpdesk_sync=debug,helpdesk_watch=debug".into()),
        )
        .init();

    let config = SyncConfig::from_env()?;
    let user_id: Uuid = std::env::var("HELPDESK_USER_ID")
        .context("HELPDESK_USER_ID is required")?
        .parse()
        .context("HELPDESK_USER_ID must be a UUID")?;
    let role: Role = std::env::var("HELPDESK_ROLE")
        .unwrap_or_else(|_| "user".into())
        .parse()
        .map_err(anyhow::Error::msg)?;
    let name = std::env::var("HELPDESK_USER_NAME").unwrap_or_else(|_| user_id.to_string());

    info!("Watching {} at {} (feed {})", name, config.api_url, config.feed_url);

    let remote = Remote::http(&config)?;
    let session = Session {
        user_id,
        name,
        role,
    };
    let context = SyncContext::init(session, remote, Arc::new(TracingAlerts), config).await;

    for kind in WATCHED {
        context
            .broker()
            .subscribe(kind, |signal| info!("[SIGNAL] {:?}", signal));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    context.teardown().await;

    Ok(())
}
