// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! acp-sellerd
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Built-in offerings shipped with the daemon.
pub mod offerings;
/// Single-instance enforcement through a PID file.
pub mod pidfile;

use acp_client::AcpClient;
use acp_config::SellerConfig;
use acp_delivery::resolve_delivery_root;
use acp_offering::OfferingRegistry;
use acp_runtime::{JobSource, PollReconciler, SellerEngine, ShutdownToken};
use acp_socket::alert::alerter_from_key;
use acp_socket::{SocketConfig, SocketEvent, SocketListener};
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Capacity of the socket-to-dispatcher event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Wire up the engine, start both event producers, and run until `shutdown`
/// is signalled.
///
/// In-flight stages are not drained on shutdown; the backend's idempotency
/// plus the in-flight set provide at-most-once semantics across restarts.
pub async fn run_seller(
    config: SellerConfig,
    registry: OfferingRegistry,
    shutdown: ShutdownToken,
) -> anyhow::Result<()> {
    let api_key = config.require_api_key()?.to_string();
    let client = AcpClient::new(config.base_url.clone(), api_key);

    let wallet = match &config.wallet_address {
        Some(wallet) => wallet.clone(),
        None => {
            client
                .agent_info()
                .await
                .context("resolve wallet address from agent info")?
                .wallet_address
        }
    };
    let wallet = wallet.trim().to_lowercase();

    let delivery_root = config
        .delivery_root
        .clone()
        .unwrap_or_else(resolve_delivery_root);

    let registry = Arc::new(registry);
    let ready = registry.discover();
    info!(
        target: "acp.supervisor",
        wallet = %wallet,
        offerings = ?ready,
        delivery_root = %delivery_root.display(),
        poll_enabled = config.poll_enabled,
        "seller starting"
    );

    let engine = Arc::new(SellerEngine::new(
        client.clone(),
        Arc::clone(&registry),
        &wallet,
        delivery_root,
    ));

    // Push channel.
    let socket_config = SocketConfig::for_backend(&config.base_url, wallet.clone());
    let alerter = alerter_from_key(config.pagerduty_routing_key.clone());
    let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let listener = SocketListener::new(socket_config, alerter, events_tx);
    let socket_shutdown = shutdown.clone();
    let socket_task = tokio::spawn(async move {
        listener.run(async move { socket_shutdown.wait().await }).await;
    });

    // Socket events feed the same dispatcher as the reconciler.
    let forward_engine = Arc::clone(&engine);
    let forward_task = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                SocketEvent::RoomJoined => {
                    info!(target: "acp.supervisor", "wallet room joined");
                }
                SocketEvent::NewTask(job) | SocketEvent::Evaluate(job) => {
                    forward_engine.handle_job(&job, JobSource::Socket).await;
                }
            }
        }
    });

    // Pull channel, unless disabled by configuration.
    let poll_task = if config.poll_enabled {
        let reconciler = PollReconciler::new(
            client,
            Arc::clone(&engine),
            config.poll_interval,
            config.poll_page_size,
        );
        let poll_shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            reconciler.run(async move { poll_shutdown.wait().await }).await;
        }))
    } else {
        info!(target: "acp.supervisor", "polling disabled, socket is the only event source");
        None
    };

    shutdown.wait().await;
    let _ = socket_task.await;
    if let Some(task) = poll_task {
        let _ = task.await;
    }
    // The listener owned the event sender; the forwarder drains and exits.
    let _ = forward_task.await;

    info!(target: "acp.supervisor", "seller stopped");
    Ok(())
}
