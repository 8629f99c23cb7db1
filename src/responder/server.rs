//! Event dispatch loop.
//!
//! One task owns the live transport, the directory handle and the event receiver.
//! Packets are handled strictly in delivery order and every reply is sent before the
//! next event is read. Any link failure (a `LinkLost` event, a closed channel, a
//! failed health check or an I/O error while sending) drops the subscription, closes
//! the transport and hands over to the [`ConnectionSupervisor`].

use super::commands::{interpret, node_report, Action, InboundMessage, OutboundReply, ReplyPolicy};
use super::supervisor::{wait_for_stop, ConnectionSupervisor};
use crate::config::Config;
use crate::directory::{DirectoryHandle, NodeDirectory};
use crate::logutil::{escape_log, preview};
use crate::metrics;
use crate::transport::{Connector, InboundPacket, RadioTransport, TransportError, TransportEvent};
use anyhow::{anyhow, Result};
use chrono::Local;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Floor for the idle tick; `tokio::time::interval` rejects a zero period.
const MIN_IDLE_TICK: Duration = Duration::from_millis(1);

/// What a finished run did; returned when the loop exits on shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub packets_handled: u64,
    pub packets_dropped: u64,
    pub replies_sent: u64,
    pub reply_failures: u64,
    pub directory_refreshes: u64,
    pub reconnects: u64,
}

pub struct ResponderServer<C: Connector> {
    supervisor: ConnectionSupervisor<C>,
    policy: ReplyPolicy,
    refresh_on_reconnect: bool,
    verbose_nodes: bool,
    idle_tick: Duration,
    directory: DirectoryHandle,
    shutdown: watch::Receiver<bool>,
    summary: RunSummary,
}

impl<C: Connector> ResponderServer<C> {
    pub fn new(config: &Config, connector: C, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            supervisor: ConnectionSupervisor::new(connector, config.meshtastic.reconnect_delay()),
            policy: ReplyPolicy::from_config(&config.responder, config.meshtastic.channel),
            refresh_on_reconnect: config.responder.refresh_on_reconnect,
            verbose_nodes: config.logging.log_node_telemetry,
            idle_tick: config.meshtastic.idle_tick().max(MIN_IDLE_TICK),
            directory: DirectoryHandle::default(),
            shutdown,
            summary: RunSummary::default(),
        }
    }

    /// Handle to the live directory; stays valid after `run` consumes the server.
    pub fn directory(&self) -> DirectoryHandle {
        self.directory.clone()
    }

    /// Connect, then answer commands until shutdown.
    ///
    /// Fails only if the first connection hits a fatal error (bad address, missing
    /// device). Every later failure is retried.
    pub async fn run(mut self) -> Result<RunSummary> {
        let mut shutdown = self.shutdown.clone();

        let initial = self
            .supervisor
            .connect_initial(&mut shutdown)
            .await
            .map_err(|e| anyhow!("cannot connect to radio at {}: {}", self.supervisor.describe(), e))?;
        let Some(mut transport) = initial else {
            info!("Shutdown requested before the radio connected");
            self.supervisor.close();
            return Ok(self.summary);
        };

        self.refresh_directory(&transport);
        info!("Node list: {}", self.directory.snapshot().summary());
        let mut events = transport.subscribe();
        info!("Listening for ping / info / infotest");

        let mut idle = tokio::time::interval(self.idle_tick);
        idle.set_missed_tick_behavior(MissedTickBehavior::Delay);
        idle.reset();

        loop {
            // packets already queued are handled before the next health check
            let failure: Option<String> = tokio::select! {
                biased;
                _ = wait_for_stop(&mut shutdown) => {
                    info!("Received shutdown signal");
                    break;
                }
                event = events.recv() => match event {
                    Some(TransportEvent::Packet(packet)) => self
                        .handle_packet(&mut transport, packet)
                        .await
                        .err()
                        .map(|e| e.to_string()),
                    Some(TransportEvent::LinkLost(reason)) => Some(reason),
                    None => Some("event channel closed".to_string()),
                },
                _ = idle.tick() => transport.poll_link().await.err().map(|e| e.to_string()),
            };

            let Some(reason) = failure else { continue };
            warn!("Radio link lost: {}", reason);
            drop(events);
            self.supervisor.disconnect(&mut transport).await;
            transport = match self.supervisor.reconnect(&mut shutdown).await {
                Some(t) => t,
                None => {
                    info!("Shutdown requested while reconnecting");
                    return Ok(self.finish());
                }
            };
            self.summary.reconnects += 1;
            events = transport.subscribe();
            if self.refresh_on_reconnect {
                self.refresh_directory(&transport);
                info!("Node list: {}", self.directory.snapshot().summary());
            }
            idle.reset();
        }

        self.supervisor.close();
        self.supervisor.disconnect(&mut transport).await;
        Ok(self.finish())
    }

    fn finish(mut self) -> RunSummary {
        self.supervisor.close();
        info!(
            "Responder stopped after {} connect attempts; {}",
            self.supervisor.attempts(),
            metrics::snapshot()
        );
        self.summary
    }

    fn refresh_directory(&mut self, transport: &C::Transport) -> Arc<NodeDirectory> {
        let directory = NodeDirectory::refresh(transport, self.verbose_nodes);
        self.summary.directory_refreshes += 1;
        debug!("Directory refreshed: {} nodes", directory.len());
        self.directory.replace(directory)
    }

    /// Decode, interpret and act on one packet. `Err` only for link failures.
    async fn handle_packet(
        &mut self,
        transport: &mut C::Transport,
        packet: InboundPacket,
    ) -> Result<(), TransportError> {
        metrics::inc_packets_received();
        self.summary.packets_handled += 1;

        let message = match InboundMessage::from_packet(&packet) {
            Ok(m) => m,
            Err(e) => {
                debug!("Dropping packet from {}: {}", packet.from, e);
                metrics::inc_packets_dropped();
                self.summary.packets_dropped += 1;
                return Ok(());
            }
        };

        let directory = self.directory.snapshot();
        info!(
            "{} ({}): {}",
            escape_log(directory.short_name(message.sender)),
            message.sender,
            preview(&message.text, 160)
        );

        let now = Local::now().naive_local();
        match interpret(&message, &directory, now, &self.policy) {
            Action::NoOp => Ok(()),
            Action::Reply(reply) => {
                metrics::inc_commands_matched();
                self.send(transport, reply).await
            }
            Action::RefreshAndReply {
                sender,
                sender_name,
            } => {
                metrics::inc_commands_matched();
                info!(
                    "Info test request from {} ({})",
                    escape_log(&sender_name),
                    sender
                );
                let refreshed = self.refresh_directory(transport);
                let reply = node_report(sender, &sender_name, &refreshed, &self.policy);
                self.send(transport, reply).await
            }
        }
    }

    async fn send(
        &mut self,
        transport: &mut C::Transport,
        reply: OutboundReply,
    ) -> Result<(), TransportError> {
        match transport.send_text(&reply.text, reply.dest).await {
            Ok(()) => {
                metrics::inc_replies_sent();
                self.summary.replies_sent += 1;
                info!("Sent to {}: {}", reply.dest, escape_log(&reply.text));
                Ok(())
            }
            Err(e) => {
                metrics::inc_reply_failures();
                self.summary.reply_failures += 1;
                if e.is_link_failure() {
                    Err(e)
                } else {
                    warn!("Failed to send reply to {}: {}", reply.dest, e);
                    Ok(())
                }
            }
        }
    }
}
