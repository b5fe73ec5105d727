//! MQTT transport used by the sensorbee agent.
//!
//! Wraps rumqttc with:
//! - validated connection settings ([`Config`]) including credentials and TLS;
//! - a connection kernel that drives the event loop, reports
//!   [`ConnectionState`] over a watch channel and reconnects with [`Backoff`]
//!   once the broker has accepted the first CONNECT;
//! - [`MqttManager::connect`], which waits for that first CONNACK so startup
//!   failures surface as errors instead of silent retries;
//! - a JSON [`Publisher`] addressed by [`EndpointMetadata`].

mod backoff;
mod client;
mod config;
mod connection;
mod error;
mod manager;
mod publisher;
mod state;

pub use backoff::{Backoff, BackoffError};
pub use client::ClientBuilder;
pub use config::{Config, EndpointMetadata, TlsConfig};
pub use connection::ConnectionKernel;
pub use error::TransferError;
pub use manager::{MqttInstance, MqttManager, PublishDrain, PublishGuard};
pub use publisher::{qos_from_u8, Publisher};
pub use state::ConnectionState;
