//! Verbindung – Verwaltet eine einzelne WebSocket-Verbindung
//!
//! Jede Verbindung laeuft in einem eigenen Task. Eingehende Text-Frames
//! gehen an den `Dispatcher`, ausgehende Frames kommen aus der
//! Send-Queue der Registry.
//!
//! ## Heartbeat
//! - Das Relay sendet alle `heartbeat` einen Ping
//! - Kam seit dem letzten Ping kein Pong, wird die Verbindung getrennt
//! - Beim Trennen fallen alle Subscriptions der Verbindung weg

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::dispatcher::Dispatcher;
use crate::registry::ConnectionId;
use crate::server::RelayState;

/// Verarbeitet eine WebSocket-Verbindung bis zum Trennen
pub async fn verarbeiten(state: RelayState, socket: WebSocket, peer: SocketAddr) {
    let verbindung = ConnectionId::neu();
    let heartbeat = state.config.heartbeat;
    let mut shutdown_rx = state.shutdown();

    tracing::info!(peer = %peer, verbindung = %verbindung, "Neue Verbindung");

    let mut sende_rx = state.registry.verbindung_registrieren(verbindung).await;
    let dispatcher = Dispatcher::neu(state.clone(), verbindung);
    let (mut sink, mut stream) = socket.split();

    let mut ping_takt = interval_at(Instant::now() + heartbeat, heartbeat);
    ping_takt.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pong_erhalten = true;

    loop {
        tokio::select! {
            // Eingehende Frames vom Client
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        dispatcher.verarbeiten(&text).await;
                    }
                    Some(Ok(Message::Binary(daten))) => match String::from_utf8(daten) {
                        Ok(text) => dispatcher.verarbeiten(&text).await,
                        Err(_) => {
                            tracing::debug!(verbindung = %verbindung, "Binaer-Frame ohne UTF-8 verworfen");
                        }
                    },
                    Some(Ok(Message::Pong(_))) => {
                        pong_erhalten = true;
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // axum beantwortet Pings selbst
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!(peer = %peer, verbindung = %verbindung, "Verbindung vom Client getrennt");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(verbindung = %verbindung, fehler = %e, "WebSocket-Lesefehler");
                        break;
                    }
                }
            }

            // Ausgehende Frames (Antworten, Zustellungen)
            ausgehend = sende_rx.recv() => {
                let Some(text) = ausgehend else { break };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::warn!(verbindung = %verbindung, fehler = %e, "Senden fehlgeschlagen");
                    break;
                }
            }

            // Heartbeat
            _ = ping_takt.tick() => {
                if !pong_erhalten {
                    tracing::warn!(peer = %peer, verbindung = %verbindung, "Kein Pong – Verbindung getrennt");
                    break;
                }
                pong_erhalten = false;
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    tracing::warn!(verbindung = %verbindung, fehler = %e, "Ping fehlgeschlagen");
                    break;
                }
            }

            // Server-Shutdown
            _ = shutdown_rx.changed() => {
                tracing::debug!(verbindung = %verbindung, "Shutdown – Verbindung wird geschlossen");
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    let entfernt = state.registry.verbindung_entfernen(verbindung).await;
    tracing::info!(
        peer = %peer,
        verbindung = %verbindung,
        subscriptions = entfernt,
        "Verbindung beendet"
    );
}
