use crate::auth::{CredentialVerifier, StoreVerifier};
use crate::clock::Clock;
use crate::registry::PlayerRegistry;
use crate::scheduler::Scheduler;
use crate::store::CourtStore;
use std::sync::Arc;

/// Shared services behind every request handler.
#[derive(Clone)]
pub struct ServerState {
    pub scheduler: Scheduler,
    pub registry: PlayerRegistry,
    /// Verifies players checking in or out.
    pub players: Arc<dyn CredentialVerifier>,
    /// Verifies administrators logging in.
    pub admins: Arc<dyn CredentialVerifier>,
}

impl ServerState {
    pub fn new(store: Arc<dyn CourtStore>, clock: Arc<dyn Clock>) -> Self {
        let scheduler = Scheduler::new(store.clone(), clock.clone());
        let registry = PlayerRegistry::new(store.clone(), scheduler.clone(), clock);
        Self {
            scheduler,
            registry,
            players: Arc::new(StoreVerifier::players(store.clone())),
            admins: Arc::new(StoreVerifier::admins(store)),
        }
    }
}
