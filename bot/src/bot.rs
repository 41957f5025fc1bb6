//! Wires configuration, the query connection and the notifier together.

use anyhow::{Context, Result};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{BotConfig, DiscoveryMode, MissingGroupPolicy};
use crate::directory::{Directory, DirectoryError};
use crate::notifier::{
    Blacklist, EventDiscovery, NotifiedSet, Notifier, PollingDiscovery, TargetGroups,
};
use crate::query::QueryClient;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("no server group named {label:?} found")]
    NoTargetGroup { label: String },
}

/// Log in, select the virtual server and resolve the target groups.
pub async fn prepare<D: Directory>(
    directory: &mut D,
    config: &BotConfig,
) -> Result<TargetGroups> {
    let host = config.ts3.address();

    directory
        .login(&config.ts3.username, &config.ts3.password)
        .await
        .with_context(|| format!("login as {} on {}", config.ts3.username, host))?;
    info!(username = %config.ts3.username, "Logged in");

    directory
        .select_virtual_server(config.ts3.virtual_server_id)
        .await
        .with_context(|| {
            format!(
                "select virtual server {} on {}",
                config.ts3.virtual_server_id, host
            )
        })?;

    let groups = directory
        .list_groups()
        .await
        .with_context(|| format!("list server groups on {}", host))?;

    let label = &config.notifier.target_group;
    let targets = TargetGroups::resolve(&groups, label);
    for id in targets.ids() {
        info!(group_id = id, %label, "Found target group");
    }

    if targets.is_empty() {
        match config.notifier.missing_target_group {
            MissingGroupPolicy::Fail => {
                error!(severity = "critical", %label, "No target group found");
                return Err(StartupError::NoTargetGroup {
                    label: label.clone(),
                }
                .into());
            }
            MissingGroupPolicy::Continue => {
                warn!(%label, "No target group found, nobody will be notified");
            }
        }
    }

    Ok(targets)
}

/// Build the notifier and drive it with the configured discovery mode until
/// `cancel` fires or the directory fails.
pub async fn serve<D: Directory>(
    directory: &mut D,
    config: &BotConfig,
    notified: NotifiedSet,
    cancel: &CancellationToken,
) -> Result<()> {
    let host = config.ts3.address();
    let targets = prepare(directory, config).await?;
    let blacklist = Blacklist::new(config.notifier.blacklist.iter().cloned());

    let mut notifier = Notifier::new(
        config.message.clone(),
        config.notifier.delivery,
        targets,
        blacklist.clone(),
        notified,
    );

    let result = match config.notifier.mode {
        DiscoveryMode::Events => {
            let joins = directory
                .subscribe_joins()
                .await
                .with_context(|| format!("subscribe to join events on {}", host))?;
            let mut source = EventDiscovery::new(
                joins,
                blacklist,
                config.timing.event_tick(),
                config.timing.keep_alive(),
            );
            info!("Listening for joining clients");
            notifier.run(directory, &mut source, cancel).await
        }
        DiscoveryMode::Polling => {
            let mut source = PollingDiscovery::new(
                blacklist,
                config.timing.poll_interval(),
                config.timing.detail_delay(),
            );
            info!("Polling connected clients");
            notifier.run(directory, &mut source, cancel).await
        }
    };

    result.with_context(|| format!("notification loop on {}", host))
}

/// Load the cache, connect, and serve until cancelled.
pub async fn run(config: BotConfig, cancel: CancellationToken) -> Result<()> {
    let notified = NotifiedSet::load(&config.notifier.cache_dir, &config.notifier.cache_file)
        .await
        .with_context(|| {
            format!(
                "read notified cache in {}",
                config.notifier.cache_dir.display()
            )
        })?;

    let host = config.ts3.address();
    info!(%host, "Trying to connect");
    let mut client = QueryClient::connect(&host, config.ts3.response_timeout())
        .await
        .with_context(|| format!("connect to {}", host))?;

    let result = serve(&mut client, &config, notified, &cancel).await;
    match &result {
        Err(e) if connection_lost(e) => {
            warn!(peer = client.peer(), "Connection lost, skipping quit");
        }
        _ => {
            info!(peer = client.peer(), "Closing query connection");
            client.quit().await;
        }
    }
    result
}

/// Whether `err` came from a connection that can no longer carry a reply.
fn connection_lost(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<DirectoryError>(),
            Some(DirectoryError::Disconnected | DirectoryError::Io(_))
        )
    })
}
