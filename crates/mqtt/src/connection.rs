//! The connection kernel: the single task that drives rumqttc's `EventLoop`.
//!
//! ```text
//! MqttInstance / Publisher ── AsyncClient ──► request channel
//!                                                  │
//!                         ConnectionKernel ── EventLoop::poll() ──► broker
//!                                │
//!                                └── watch<ConnectionState>
//! ```
//!
//! Failure handling differs before and after the first CONNACK:
//!
//! * before it, any error ends the kernel with `Disconnected`: the caller is
//!   still waiting in `MqttManager::connect` and reports a fatal connect error;
//! * after it, recoverable errors are retried on the `Backoff` schedule while
//!   fatal ones (bad credentials, TLS, protocol violations) end the kernel.
//!
//! Cancellation sends DISCONNECT and keeps polling for a short grace period
//! so that already queued publishes reach the broker before the socket closes.

use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{backoff::Backoff, error::TransferError, state::ConnectionState};

const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

pub struct ConnectionKernel {
    client: AsyncClient,
    event_loop: EventLoop,
    backoff: Backoff,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
    accepted_once: bool,
}

impl ConnectionKernel {
    pub fn new(
        client: AsyncClient,
        event_loop: EventLoop,
        backoff: Backoff,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            client,
            event_loop,
            backoff,
            cancel,
            state_tx,
            accepted_once: false,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn update_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state.clone();
            true
        });
        if changed {
            debug!("Connection state changed to: {state}");
        }
    }

    /// Drives the event loop until cancellation or a terminal error.
    ///
    /// Dropping the kernel at the end closes the state channel, so watchers
    /// observe the final state and then `changed()` errors.
    pub async fn run(mut self) -> Result<(), TransferError> {
        info!("Starting connection event loop...");
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    self.disconnect().await;
                    self.update_state(ConnectionState::Closed);
                    info!("Connection kernel shutdown completed");
                    return Ok(());
                }

                polled = self.event_loop.poll() => match polled {
                    Ok(event) => self.handle_event(event),
                    Err(e) => self.handle_error(e).await?,
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) if ack.code == ConnectReturnCode::Success => {
                if self.accepted_once {
                    info!("Reconnected to broker");
                } else {
                    info!("Connection established successfully");
                }
                self.accepted_once = true;
                self.backoff.reset();
                self.update_state(ConnectionState::Connected);
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Disconnected by broker");
            }
            Event::Incoming(packet) => trace!("Incoming packet: {packet:?}"),
            Event::Outgoing(outgoing) => trace!("Outgoing packet: {outgoing:?}"),
        }
    }

    async fn handle_error(&mut self, e: ConnectionError) -> Result<(), TransferError> {
        let reason = root_cause(&e);

        if !self.accepted_once {
            error!("Broker connection failed: {reason}");
            self.update_state(ConnectionState::Disconnected(reason));
            return Err(e.into());
        }
        if is_fatal_error(&e) {
            error!("Fatal connection error, stopping: {reason}");
            self.update_state(ConnectionState::Disconnected(reason));
            return Err(e.into());
        }

        let delay = match self.backoff.next_sleep() {
            Ok(delay) => delay,
            Err(exhausted) => {
                error!("Giving up on broker: {exhausted}");
                self.update_state(ConnectionState::Disconnected(exhausted.to_string()));
                return Err(exhausted.into());
            }
        };

        warn!(
            "Connection lost ({reason}), reconnecting in {:.2} seconds (attempt {})",
            delay.as_secs_f64(),
            self.backoff.attempt()
        );
        self.update_state(ConnectionState::Reconnecting(delay.as_secs_f64()));

        // Cancellation during the pause is picked up by the main select.
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        if !self.state_tx.borrow().is_connected() {
            debug!("Not connected, skipping DISCONNECT");
            return;
        }
        if let Err(e) = self.client.try_disconnect() {
            warn!("Error queueing disconnect packet: {e}");
            return;
        }

        let flush = async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("Event loop ended during shutdown: {}", root_cause(&e));
                        break;
                    }
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_GRACE, flush).await.is_err() {
            warn!(
                "Broker did not take DISCONNECT within {}s, closing anyway",
                DISCONNECT_GRACE.as_secs()
            );
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Fatal,
    Reconnect,
}

fn classify_connection_error(err: &ConnectionError) -> Disposition {
    use Disposition::*;

    match err {
        ConnectionError::Tls(_)
        | ConnectionError::MqttState(_)
        | ConnectionError::NotConnAck(_)
        | ConnectionError::RequestsDone => Fatal,

        ConnectionError::Io(e) => match e.kind() {
            std::io::ErrorKind::AddrInUse
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidInput
            | std::io::ErrorKind::InvalidData => Fatal,
            _ => Reconnect,
        },

        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => Reconnect,

        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::RefusedProtocolVersion
            | ConnectReturnCode::BadClientId
            | ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized => Fatal,
            ConnectReturnCode::ServiceUnavailable | ConnectReturnCode::Success => Reconnect,
        },

        #[allow(unreachable_patterns)]
        _ => Reconnect,
    }
}

fn is_fatal_error(err: &ConnectionError) -> bool {
    classify_connection_error(err) == Disposition::Fatal
}

/// Innermost message of an error chain, e.g. "Connection refused (os error 111)".
fn root_cause(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string().trim_matches('"').to_string()
}
