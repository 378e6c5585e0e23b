//! Shared application state injected into the orchestration writers, the
//! committee consumer and the webhook processor. Grounded on the
//! capability-composition note in §9 ("implement as separate capability
//! interfaces and combine by composition, not inheritance") — `AppState`
//! is a plain struct of `Arc<dyn Trait>` handles, not a supertrait.

use std::sync::Arc;

use mailing_list_core::bus::{Bus, EventPublisher};
use mailing_list_core::entity_attribute::EntityAttributeClient;
use mailing_list_core::provider::GroupsIoClient;
use mailing_list_core::storage::KvStore;

#[derive(Clone)]
pub struct AppState {
    pub kv: Arc<dyn KvStore>,
    pub bus: Arc<dyn Bus>,
    pub provider: Arc<dyn GroupsIoClient>,
    pub publisher: Arc<EventPublisher>,
    pub entity_attributes: Arc<EntityAttributeClient>,
    pub webhook_secret: Arc<Vec<u8>>,
}

impl AppState {
    pub fn new(
        kv: Arc<dyn KvStore>,
        bus: Arc<dyn Bus>,
        provider: Arc<dyn GroupsIoClient>,
        webhook_secret: Vec<u8>,
    ) -> Self {
        let publisher = Arc::new(EventPublisher::new(bus.clone()));
        let entity_attributes = Arc::new(EntityAttributeClient::new(bus.clone()));
        Self {
            kv,
            bus,
            provider,
            publisher,
            entity_attributes,
            webhook_secret: Arc::new(webhook_secret),
        }
    }
}
