//! Bridge from queue consumers to stores.

use async_trait::async_trait;
use booking_core::envelope::{Envelope, Inbound};
use booking_core::reducer::Reducer;
use booking_runtime::{EnvelopeHandler, HandlerError, Store};

/// Decodes each delivery into the store's action type and sends it.
///
/// Kinds the inbox does not handle are ignored; malformed payloads are
/// returned as errors so the consumer logs and drops them.
pub struct StoreHandler<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    service: &'static str,
    store: Store<S, A, E, R>,
}

impl<S, A, E, R> StoreHandler<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    /// Handler feeding `store`; `service` labels log lines
    #[must_use]
    pub const fn new(service: &'static str, store: Store<S, A, E, R>) -> Self {
        Self { service, store }
    }
}

#[async_trait]
impl<S, A, E, R> EnvelopeHandler for StoreHandler<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
    A: Inbound + Send + 'static,
    S: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        match A::from_envelope(&envelope)? {
            Some(action) => {
                self.store.send(action).await?;
            },
            None => {
                tracing::debug!(service = self.service, kind = %envelope.kind, "Ignored message");
            },
        }
        Ok(())
    }
}
