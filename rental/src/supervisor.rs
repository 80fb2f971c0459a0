//! Supervised building workers.
//!
//! Each building runs as its own store plus queue consumer, keyed by id. The
//! registry starts workers through [`BuildingSupervisor`]; the application
//! stops them all on shutdown.

use crate::building::{BuildingEnvironment, BuildingReducer, BuildingState};
use crate::error::ServiceError;
use crate::handler::StoreHandler;
use crate::protocol::{building_key, building_queue};
use crate::registry::{BuildingSetup, BuildingSupervisor};
use async_trait::async_trait;
use booking_core::bus::{Binding, MessageBus};
use booking_runtime::{Consumer, ConsumerExit, RetryPolicy, Store};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Store of one building.
pub type BuildingStore = Store<BuildingState, crate::building::BuildingAction, BuildingEnvironment, BuildingReducer>;

struct Worker {
    store: BuildingStore,
    shutdown: broadcast::Sender<()>,
    consumer: JoinHandle<ConsumerExit>,
}

/// Owns every running building worker.
#[derive(Clone)]
pub struct BuildingWorkers {
    bus: Arc<dyn MessageBus>,
    retry_policy: RetryPolicy,
    shutdown_timeout: Duration,
    workers: Arc<Mutex<BTreeMap<u32, Worker>>>,
}

impl BuildingWorkers {
    /// No workers yet
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, retry_policy: RetryPolicy, shutdown_timeout: Duration) -> Self {
        Self {
            bus,
            retry_policy,
            shutdown_timeout,
            workers: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Ids of running workers
    pub async fn ids(&self) -> Vec<u32> {
        self.workers.lock().await.keys().copied().collect()
    }

    /// Current booking state of a building
    pub async fn snapshot(&self, id: u32) -> Option<BuildingState> {
        let store = self.workers.lock().await.get(&id).map(|w| w.store.clone())?;
        Some(store.state(Clone::clone).await)
    }

    /// Signal every worker and wait for each with a bounded timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Shutdown`] naming the workers that did not stop in time.
    pub async fn shutdown_all(&self) -> Result<(), ServiceError> {
        let workers = std::mem::take(&mut *self.workers.lock().await);
        let mut stuck = Vec::new();

        for worker in workers.values() {
            let _ = worker.shutdown.send(());
        }

        for (id, worker) in workers {
            match tokio::time::timeout(self.shutdown_timeout, worker.consumer).await {
                Ok(Ok(exit)) => info!(building = id, ?exit, "Building consumer stopped"),
                Ok(Err(e)) => warn!(building = id, error = %e, "Building consumer task failed"),
                Err(_) => {
                    warn!(building = id, "Building consumer shutdown timed out");
                    stuck.push(id);
                    continue;
                },
            }

            if let Err(e) = worker.store.shutdown(self.shutdown_timeout).await {
                warn!(building = id, error = %e, "Building store shutdown timed out");
                stuck.push(id);
            }
        }

        if stuck.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Shutdown(format!("buildings {stuck:?} did not stop")))
        }
    }
}

#[async_trait]
impl BuildingSupervisor for BuildingWorkers {
    async fn start(&self, setup: BuildingSetup) -> Result<(), ServiceError> {
        let mut workers = self.workers.lock().await;
        if workers.contains_key(&setup.id) {
            return Err(ServiceError::BuildingExists(setup.id));
        }

        let store = Store::with_retry_policy(
            BuildingState::new(setup.id, setup.rooms),
            BuildingReducer,
            BuildingEnvironment::new(Arc::clone(&self.bus)),
            self.retry_policy.clone(),
        );
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let consumer = Consumer::new(
            format!("building-{}", setup.id),
            Binding::direct(building_queue(setup.id), building_key(setup.id)),
            Arc::clone(&self.bus),
            Arc::new(StoreHandler::new("building", store.clone())),
            shutdown_rx,
        )
        .with_retry_policy(self.retry_policy.clone());

        // Requests routed before the first subscribe are buffered by the queue
        consumer.declare().await?;
        let consumer = consumer.spawn();

        info!(building = setup.id, rooms = setup.rooms, "Building worker started");
        workers.insert(
            setup.id,
            Worker {
                store,
                shutdown,
                consumer,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_broker::InMemoryBus;
    use booking_core::bus::Route;
    use booking_core::envelope::Envelope;

    fn workers(bus: &InMemoryBus) -> BuildingWorkers {
        BuildingWorkers::new(Arc::new(bus.clone()), RetryPolicy::none(), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn started_worker_books_rooms() {
        let bus = InMemoryBus::new("rental_direct", "buildings_fanout");
        let workers = workers(&bus);
        workers.start(BuildingSetup { id: 1, rooms: 2 }).await.unwrap();

        let request = Envelope::encode("MakeReservation", "room-2").unwrap();
        bus.publish(&Route::direct(building_key(1)), &request).await.unwrap();

        let mut booked = false;
        for _ in 0..100 {
            if workers.snapshot(1).await.is_some_and(|s| s.is_booked("Room-2")) {
                booked = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(booked);
        workers.shutdown_all().await.unwrap();
        assert!(workers.ids().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_ids_are_refused() {
        let bus = InMemoryBus::new("rental_direct", "buildings_fanout");
        let workers = workers(&bus);
        workers.start(BuildingSetup { id: 1, rooms: 1 }).await.unwrap();

        let again = workers.start(BuildingSetup { id: 1, rooms: 1 }).await;
        assert!(matches!(again, Err(ServiceError::BuildingExists(1))));
        workers.shutdown_all().await.unwrap();
    }
}
