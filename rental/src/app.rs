//! Application wiring.
//!
//! Builds the rental agent, the building registry and its workers, and any
//! number of clients on one shared bus, and owns their consumer tasks.

use crate::agent::{AgentAction, AgentEnvironment, AgentReducer, AgentState};
use crate::config::Config;
use crate::error::ServiceError;
use crate::handler::StoreHandler;
use crate::input;
use crate::protocol::{
    BUILDING_MANAGER_QUEUE, RENTAL_AGENT_KEY, RENTAL_AGENT_NOTIFICATION_QUEUE, RENTAL_AGENT_QUEUE, client_key,
    client_notification_queue, client_queue,
};
use crate::registry::{RegistryAction, RegistryEnvironment, RegistryReducer, RegistryState};
use crate::requester::{ClientAction, ClientEnvironment, ClientReducer, ClientState, LocalReservation, Notice};
use crate::reservations::UuidGenerator;
use crate::supervisor::BuildingWorkers;
use booking_core::bus::{Binding, MessageBus};
use booking_core::environment::SystemClock;
use booking_runtime::{Consumer, ConsumerExit, EnvelopeHandler, Store};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Store of the rental agent
pub type AgentStore = Store<AgentState, AgentAction, AgentEnvironment, AgentReducer>;

/// Store of the building registry
pub type RegistryStore = Store<RegistryState, RegistryAction, RegistryEnvironment, RegistryReducer>;

/// Store of one client
pub type ClientStore = Store<ClientState, ClientAction, ClientEnvironment, ClientReducer>;

/// The running system.
pub struct Application {
    bus: Arc<dyn MessageBus>,
    config: Config,
    agent: AgentStore,
    registry: RegistryStore,
    workers: BuildingWorkers,
    clients: Vec<ClientStore>,
    client_names: HashSet<String>,
    shutdown: broadcast::Sender<()>,
    consumers: Vec<(String, JoinHandle<ConsumerExit>)>,
}

impl Application {
    /// Start the agent, the registry and their consumers.
    ///
    /// Every queue is declared before any consumer runs, so no broadcast sent
    /// after this returns can be missed.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Bus`] if a queue cannot be declared.
    pub async fn start(config: Config, bus: Arc<dyn MessageBus>) -> Result<Self, ServiceError> {
        let retry_policy = config.retry_policy();
        let workers = BuildingWorkers::new(Arc::clone(&bus), retry_policy.clone(), config.shutdown_timeout);

        let agent = Store::with_retry_policy(
            AgentState::new(),
            AgentReducer,
            AgentEnvironment {
                bus: Arc::clone(&bus),
                clock: Arc::new(SystemClock),
                ids: Arc::new(UuidGenerator),
            },
            retry_policy.clone(),
        );
        let registry = Store::with_retry_policy(
            RegistryState::default(),
            RegistryReducer,
            RegistryEnvironment {
                bus: Arc::clone(&bus),
                supervisor: Arc::new(workers.clone()),
            },
            retry_policy,
        );

        let (shutdown, _) = broadcast::channel(1);
        let mut app = Self {
            bus,
            config,
            agent,
            registry,
            workers,
            clients: Vec::new(),
            client_names: HashSet::new(),
            shutdown,
            consumers: Vec::new(),
        };

        let agent_handler: Arc<dyn EnvelopeHandler> = Arc::new(StoreHandler::new("agent", app.agent.clone()));
        let registry_handler: Arc<dyn EnvelopeHandler> =
            Arc::new(StoreHandler::new("registry", app.registry.clone()));
        let consumers = vec![
            app.consumer(
                "agent",
                Binding::direct(RENTAL_AGENT_QUEUE, RENTAL_AGENT_KEY),
                Arc::clone(&agent_handler),
            ),
            app.consumer(
                "agent-notifications",
                Binding::fanout(RENTAL_AGENT_NOTIFICATION_QUEUE),
                agent_handler,
            ),
            app.consumer("registry", Binding::fanout(BUILDING_MANAGER_QUEUE), registry_handler),
        ];
        app.launch(consumers).await?;

        info!("Rental agent and building registry started");
        Ok(app)
    }

    fn consumer(&self, name: &str, binding: Binding, handler: Arc<dyn EnvelopeHandler>) -> Consumer {
        Consumer::new(
            name,
            binding,
            Arc::clone(&self.bus),
            handler,
            self.shutdown.subscribe(),
        )
        .with_retry_policy(self.config.retry_policy())
    }

    async fn launch(&mut self, consumers: Vec<Consumer>) -> Result<(), ServiceError> {
        for consumer in &consumers {
            consumer.declare().await?;
        }
        for consumer in consumers {
            let name = consumer.name().to_string();
            self.consumers.push((name, consumer.spawn()));
        }
        Ok(())
    }

    /// Broadcast a `CreateBuilding` request.
    ///
    /// The building becomes visible once its `BuildingCreated` broadcast has
    /// been consumed.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if the agent is shutting down.
    pub async fn register_building(&self, rooms: usize) -> Result<(), ServiceError> {
        self.agent.send(AgentAction::RegisterBuilding { rooms }).await?;
        Ok(())
    }

    /// Connect a client under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Input`] for an invalid name,
    /// [`ServiceError::ClientExists`] if the name is taken, and
    /// [`ServiceError::Bus`] if its queues cannot be declared.
    pub async fn connect_client(&mut self, name: &str) -> Result<ClientHandle, ServiceError> {
        let name = input::username(name)?;
        if !self.client_names.insert(name.clone()) {
            return Err(ServiceError::ClientExists(name));
        }

        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let store = Store::with_retry_policy(
            ClientState::new(name.clone()),
            ClientReducer,
            ClientEnvironment {
                bus: Arc::clone(&self.bus),
                ids: Arc::new(UuidGenerator),
                notices: notices_tx,
            },
            self.config.retry_policy(),
        );

        let handler: Arc<dyn EnvelopeHandler> = Arc::new(StoreHandler::new("client", store.clone()));
        let consumers = vec![
            self.consumer(
                &format!("client-{name}"),
                Binding::direct(client_queue(&name), client_key(&name)),
                Arc::clone(&handler),
            ),
            self.consumer(
                &format!("client-{name}-notifications"),
                Binding::fanout(client_notification_queue(&name)),
                handler,
            ),
        ];
        self.launch(consumers).await?;
        self.clients.push(store.clone());

        info!(client = %name, "Client connected");
        Ok(ClientHandle {
            name,
            store,
            notices: Some(notices_rx),
        })
    }

    /// The rental agent's store
    #[must_use]
    pub const fn agent(&self) -> &AgentStore {
        &self.agent
    }

    /// Running building workers
    #[must_use]
    pub const fn workers(&self) -> &BuildingWorkers {
        &self.workers
    }

    /// Stop every consumer, store and building worker.
    ///
    /// Gives each component `shutdown_timeout` to finish its current work.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Shutdown`] when something did not stop in time.
    pub async fn shutdown(self) -> Result<(), ServiceError> {
        info!("Shutting down");
        let timeout = self.config.shutdown_timeout;
        let mut stuck = Vec::new();

        let _ = self.shutdown.send(());
        for (name, handle) in self.consumers {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(exit)) => info!(consumer = %name, ?exit, "Consumer stopped"),
                Ok(Err(e)) => warn!(consumer = %name, error = %e, "Consumer task failed"),
                Err(_) => {
                    warn!(consumer = %name, "Consumer shutdown timed out");
                    stuck.push(name);
                },
            }
        }

        if let Err(e) = self.registry.shutdown(timeout).await {
            warn!(error = %e, "Registry store did not stop");
            stuck.push("registry".to_string());
        }
        if let Err(e) = self.agent.shutdown(timeout).await {
            warn!(error = %e, "Agent store did not stop");
            stuck.push("agent".to_string());
        }
        for client in &self.clients {
            if let Err(e) = client.shutdown(timeout).await {
                warn!(error = %e, "Client store did not stop");
                stuck.push("client".to_string());
            }
        }
        if let Err(e) = self.workers.shutdown_all().await {
            stuck.push(e.to_string());
        }

        if stuck.is_empty() {
            info!("Graceful shutdown complete");
            Ok(())
        } else {
            Err(ServiceError::Shutdown(stuck.join(", ")))
        }
    }
}

/// A connected client.
pub struct ClientHandle {
    name: String,
    store: ClientStore,
    notices: Option<mpsc::UnboundedReceiver<Notice>>,
}

impl ClientHandle {
    /// Username
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask for the building listing.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if the client is shutting down.
    pub async fn list_buildings(&self) -> Result<(), ServiceError> {
        self.store.send(ClientAction::ListBuildings).await?;
        Ok(())
    }

    /// Ask for a reservation after validating the names locally.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Input`] for malformed names (nothing is sent),
    /// or [`ServiceError::Store`] if the client is shutting down.
    pub async fn reserve(&self, building: &str, room: &str) -> Result<(), ServiceError> {
        let building = input::building(building)?;
        let room = input::room(room)?;
        self.store.send(ClientAction::Reserve { building, room }).await?;
        Ok(())
    }

    /// Ask to cancel a reservation.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Input`] for a blank number (nothing is sent),
    /// or [`ServiceError::Store`] if the client is shutting down.
    pub async fn cancel(&self, number: &str) -> Result<(), ServiceError> {
        let number = input::reservation_number(number)?;
        self.store.send(ClientAction::Cancel { number }).await?;
        Ok(())
    }

    /// Local copy of own reservations; may be stale
    pub async fn reservations(&self) -> Vec<LocalReservation> {
        self.store.state(|s| s.reservations.values().cloned().collect()).await
    }

    /// Building announcements received so far
    pub async fn announcements(&self) -> Vec<String> {
        self.store.state(|s| s.announcements.clone()).await
    }

    /// Next notice; `None` once the notice stream was taken or closed
    pub async fn next_notice(&mut self) -> Option<Notice> {
        self.notices.as_mut()?.recv().await
    }

    /// Hand the notice stream to someone else (e.g. a printer task)
    pub fn take_notices(&mut self) -> Option<mpsc::UnboundedReceiver<Notice>> {
        self.notices.take()
    }
}
