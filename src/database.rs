//! Storage connection lifecycle.
//!
//! A single [`ConnectionManager`] is created at startup and handed to the
//! repositories and to the health endpoint. Requests share its connection
//! freely; the manager only serialises state transitions.

pub mod memory;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{Configuration, Driver};
use crate::repository::{Repository, Result, StorageError};

/// Opens, probes and closes one kind of backend connection.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Cheap handle; clones share the underlying connection.
    type Connection: Clone + Send + Sync + 'static;

    async fn open(&self) -> Result<Self::Connection>;
    /// Lightweight liveness probe.
    async fn ping(&self, connection: &Self::Connection) -> Result<()>;
    async fn close(&self, connection: Self::Connection);
    /// Printable target, without credentials.
    fn describe(&self) -> String;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Closed on shutdown. Nothing leaves this state.
    Terminated,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Terminated => "terminated",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Result of a liveness probe.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Health {
    pub status: HealthStatus,
    pub detail: String,
    pub state: ConnectionState,
}

impl Health {
    fn healthy(state: ConnectionState) -> Self {
        Self {
            status: HealthStatus::Healthy,
            detail: "ok".to_owned(),
            state,
        }
    }

    fn unhealthy(state: ConnectionState, detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            detail: detail.into(),
            state,
        }
    }
}

/// Object-safe view of a [`ConnectionManager`], whatever its backend.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    fn state(&self) -> ConnectionState;
    async fn health_check(&self) -> Health;
    /// Graceful, terminal close.
    async fn shutdown(&self);
}

struct Slot<T> {
    state: ConnectionState,
    connection: Option<T>,
}

/// Owner of the process-wide storage connection.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    slot: RwLock<Slot<C::Connection>>,
    transition: tokio::sync::Mutex<()>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a new, disconnected [`ConnectionManager`].
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            slot: RwLock::new(Slot {
                state: ConnectionState::Disconnected,
                connection: None,
            }),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.slot.read().state
    }

    fn set_state(&self, state: ConnectionState) {
        self.slot.write().state = state;
    }

    /// Current connection, when ready.
    pub fn connection(&self) -> Result<C::Connection> {
        let slot = self.slot.read();
        match (slot.state, &slot.connection) {
            (ConnectionState::Connected, Some(connection)) => Ok(connection.clone()),
            (ConnectionState::Terminated, _) => Err(StorageError::Terminated),
            _ => Err(StorageError::NotConnected),
        }
    }

    /// Open the connection, or return the existing one when already
    /// connected.
    pub async fn connect(&self) -> Result<C::Connection> {
        let _transition = self.transition.lock().await;

        {
            let slot = self.slot.read();
            match (slot.state, &slot.connection) {
                (ConnectionState::Connected, Some(connection)) => return Ok(connection.clone()),
                (ConnectionState::Terminated, _) => return Err(StorageError::Terminated),
                _ => {},
            }
        }

        self.open(ConnectionState::Connecting).await
    }

    /// Drop the current connection and open a fresh one.
    pub async fn reconnect(&self) -> Result<C::Connection> {
        let _transition = self.transition.lock().await;

        let previous = {
            let mut slot = self.slot.write();
            if slot.state == ConnectionState::Terminated {
                return Err(StorageError::Terminated);
            }
            slot.state = ConnectionState::Reconnecting;
            slot.connection.take()
        };

        if let Some(previous) = previous {
            self.connector.close(previous).await;
        }

        self.open(ConnectionState::Reconnecting).await
    }

    async fn open(&self, via: ConnectionState) -> Result<C::Connection> {
        self.set_state(via);
        let backend = self.connector.describe();
        tracing::info!(%backend, state = via.as_str(), "opening storage connection");

        match self.connector.open().await {
            Ok(connection) => {
                {
                    let mut slot = self.slot.write();
                    slot.state = ConnectionState::Connected;
                    slot.connection = Some(connection.clone());
                }
                tracing::info!(%backend, "storage connected");
                Ok(connection)
            },
            Err(err) => {
                self.set_state(ConnectionState::Disconnected);
                tracing::error!(%backend, error = %err, "storage connection failed");
                Err(err)
            },
        }
    }

    /// Close the connection but allow a later [`ConnectionManager::connect`].
    pub async fn disconnect(&self) {
        let _transition = self.transition.lock().await;

        let previous = {
            let mut slot = self.slot.write();
            if slot.state == ConnectionState::Terminated {
                return;
            }
            slot.state = ConnectionState::Disconnected;
            slot.connection.take()
        };

        if let Some(previous) = previous {
            self.connector.close(previous).await;
            tracing::info!(backend = %self.connector.describe(), "storage disconnected");
        }
    }

    /// Close the connection for good.
    pub async fn shutdown(&self) {
        let _transition = self.transition.lock().await;

        let previous = {
            let mut slot = self.slot.write();
            if slot.state == ConnectionState::Terminated {
                return;
            }
            slot.state = ConnectionState::Terminated;
            slot.connection.take()
        };

        if let Some(previous) = previous {
            self.connector.close(previous).await;
        }
        tracing::info!(backend = %self.connector.describe(), "storage connection closed");
    }

    /// Probe the backend. Never changes state.
    pub async fn health_check(&self) -> Health {
        let (state, connection) = {
            let slot = self.slot.read();
            (slot.state, slot.connection.clone())
        };

        let Some(connection) = connection else {
            return Health::unhealthy(state, format!("storage is {}", state.as_str()));
        };

        match self.connector.ping(&connection).await {
            Ok(()) => Health::healthy(state),
            Err(err) => Health::unhealthy(state, err.to_string()),
        }
    }

    /// Periodically probe the backend and reconnect when the probe fails.
    /// Stops once the manager is terminated.
    pub fn supervise(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                interval.tick().await;
                match self.state() {
                    ConnectionState::Terminated => break,
                    ConnectionState::Connecting | ConnectionState::Reconnecting => continue,
                    ConnectionState::Connected | ConnectionState::Disconnected => {},
                }

                let health = self.health_check().await;
                if health.status == HealthStatus::Healthy {
                    continue;
                }

                tracing::warn!(detail = %health.detail, "storage probe failed, reconnecting");
                if let Err(err) = self.reconnect().await {
                    tracing::error!(error = %err, "storage reconnection failed");
                }
            }
        })
    }
}

#[async_trait]
impl<C: Connector> Lifecycle for ConnectionManager<C> {
    fn state(&self) -> ConnectionState {
        ConnectionManager::state(self)
    }

    async fn health_check(&self) -> Health {
        ConnectionManager::health_check(self).await
    }

    async fn shutdown(&self) {
        ConnectionManager::shutdown(self).await
    }
}

/// Repository and lifecycle handles sharing one connection.
#[derive(Clone)]
pub struct Storage {
    pub repo: Arc<dyn Repository>,
    pub lifecycle: Arc<dyn Lifecycle>,
}

/// Connect the configured backend.
///
/// Failing here must stop the process: nothing is served while
/// disconnected.
pub async fn open(config: &Configuration) -> Result<Storage> {
    let every = Duration::from_millis(config.database.reconnect_interval_ms);

    match config.database.driver {
        Driver::Postgres => {
            let connector = postgres::PgConnector::new(
                config.database.url_for(config.environment),
                &config.database,
            );
            let manager = Arc::new(ConnectionManager::new(connector));
            manager.connect().await?;

            let repo = postgres::PostgresRepository::new(Arc::clone(&manager));
            repo.migrate().await?;

            Arc::clone(&manager).supervise(every);
            Ok(Storage {
                repo: Arc::new(repo),
                lifecycle: manager,
            })
        },
        Driver::Memory => {
            let manager = Arc::new(ConnectionManager::new(memory::MemoryConnector::default()));
            manager.connect().await?;

            Arc::clone(&manager).supervise(every);
            Ok(Storage {
                repo: Arc::new(memory::MemoryRepository::new(Arc::clone(&manager))),
                lifecycle: manager,
            })
        },
    }
}

/// Hide credentials of a connection string.
pub fn mask_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut url) => {
            if !url.username().is_empty() {
                let _ = url.set_username("***");
            }
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        },
        Err(_) => "<invalid url>".to_owned(),
    }
}
