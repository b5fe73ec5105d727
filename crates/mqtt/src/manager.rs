//! Entry point of the transport: validate settings, open the connection and
//! hand back an `MqttInstance` once the broker has accepted us.
//!
//! ```ignore
//! let instance = MqttManager::from_config(config)?.connect().await?;
//! instance.publisher().publish(&reading, &EndpointMetadata::retained(topic, 1)).await?;
//! instance.shutdown().await?;
//! ```

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use rumqttc::AsyncClient;
use tokio::{
    sync::{watch, Mutex, Notify},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use validator::Validate;

use super::{
    backoff::Backoff, client::ClientBuilder, config::Config, connection::ConnectionKernel,
    error::TransferError, publisher::Publisher, state::ConnectionState,
};

/// Counts publishes that are still handing their packet to the client so
/// that shutdown can wait for them before stopping the kernel.
#[derive(Debug, Default)]
pub struct PublishDrain {
    inflight: AtomicUsize,
    notify: Notify,
}

impl PublishDrain {
    pub fn enter(self: &Arc<Self>) -> PublishGuard {
        self.inflight.fetch_add(1, Ordering::AcqRel);
        PublishGuard { drain: self.clone() }
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    pub async fn wait_idle(&self) {
        loop {
            let notified = self.notify.notified();
            if self.inflight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

pub struct PublishGuard {
    drain: Arc<PublishDrain>,
}

impl Drop for PublishGuard {
    fn drop(&mut self) {
        if self.drain.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drain.notify.notify_waiters();
        }
    }
}

pub struct MqttManager {
    config: Config,
}

impl MqttManager {
    pub fn from_config(config: Config) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Spawns the connection kernel and waits up to `connection_timeout`
    /// seconds for the first CONNACK.
    ///
    /// Any failure before that point (refused, unreachable, bad TLS, timeout)
    /// is returned as an error and the kernel is stopped.
    pub async fn connect(self) -> Result<MqttInstance, TransferError> {
        let (client, event_loop) = ClientBuilder::from_config(&self.config).build()?;
        let kernel_cancel = CancellationToken::new();
        let kernel = ConnectionKernel::new(
            client.clone(),
            event_loop,
            Backoff::from_config(&self.config),
            kernel_cancel.clone(),
        );
        let state = kernel.subscribe_state();

        info!(
            host = %self.config.host,
            port = self.config.port,
            client_id = %self.config.client_id,
            "Connecting to MQTT broker"
        );
        let mut handle = tokio::spawn(kernel.run());
        // Stops the kernel if this future is dropped before the CONNACK.
        let abandon = kernel_cancel.clone().drop_guard();

        let timeout = Duration::from_secs(self.config.connection_timeout);
        match tokio::time::timeout(timeout, wait_until_connected(state.clone())).await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                return Err(match (&mut handle).await {
                    Ok(Err(e)) => e,
                    _ => TransferError::ConnectionRejected(reason),
                });
            }
            Err(_) => {
                kernel_cancel.cancel();
                if let Err(e) = handle.await {
                    debug!("Connection kernel join failed after timeout: {e}");
                }
                return Err(TransferError::ConnectTimeout(self.config.connection_timeout));
            }
        }

        abandon.disarm();
        Ok(MqttInstance {
            client,
            client_id: self.config.client_id,
            state,
            drain: Arc::new(PublishDrain::default()),
            kernel_cancel,
            kernel: Mutex::new(Some(handle)),
        })
    }
}

async fn wait_until_connected(mut state: watch::Receiver<ConnectionState>) -> Result<(), String> {
    loop {
        match &*state.borrow_and_update() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Disconnected(reason) => return Err(reason.clone()),
            ConnectionState::Closed => return Err("connection closed".into()),
            _ => {}
        }
        if state.changed().await.is_err() {
            return Err(format!("connection kernel stopped ({})", *state.borrow()));
        }
    }
}

/// A live, accepted broker session.
pub struct MqttInstance {
    client: AsyncClient,
    client_id: String,
    state: watch::Receiver<ConnectionState>,
    drain: Arc<PublishDrain>,
    kernel_cancel: CancellationToken,
    kernel: Mutex<Option<JoinHandle<Result<(), TransferError>>>>,
}

impl MqttInstance {
    pub fn publisher(&self) -> Publisher {
        Publisher::new(self.client.clone(), self.state.clone(), self.drain.clone())
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Waits for in-progress publishes, then disconnects and joins the kernel.
    ///
    /// Returns the kernel's own error if it had already stopped on one.
    pub async fn shutdown(&self) -> Result<(), TransferError> {
        self.drain.wait_idle().await;
        self.kernel_cancel.cancel();

        let Some(handle) = self.kernel.lock().await.take() else {
            return Ok(());
        };
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(TransferError::ConnectionClosed(format!(
                "connection kernel task failed: {e}"
            ))),
        }
    }
}

impl Drop for MqttInstance {
    fn drop(&mut self) {
        if !self.kernel_cancel.is_cancelled() {
            warn!("MQTT instance dropped without shutdown, stopping connection kernel");
            self.kernel_cancel.cancel();
        }
    }
}
