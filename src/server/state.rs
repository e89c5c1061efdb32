use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::auth::{AuthGate, JwtSigner};
use crate::broadcast::{Broadcaster, RelaySubscriber};
use crate::channel::{ChannelIndex, CleanupPolicy};
use crate::config::Settings;
use crate::connection::ConnectionRegistry;
use crate::error::Result;
use crate::membership::{create_membership_store, MembershipStore, StoreError};
use crate::redis::{BackoffConfig, RedisPool};
use crate::session::StickySessionAssigner;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub auth: Arc<AuthGate>,
    pub signer: Arc<JwtSigner>,
    pub sessions: Arc<StickySessionAssigner>,
    pub registry: Arc<ConnectionRegistry>,
    pub channels: Arc<ChannelIndex>,
    pub broadcaster: Arc<Broadcaster>,
    pub store: Arc<dyn MembershipStore>,
    pub redis_pool: Option<Arc<RedisPool>>,
    pub start_time: Instant,
}

impl AppState {
    /// Build the gateway from configuration, opening a Redis pool when the
    /// Redis membership backend is selected
    pub fn new(settings: Settings) -> Result<Self> {
        let redis_pool = if settings.membership.backend.eq_ignore_ascii_case("redis") {
            let pool = RedisPool::new(&settings.redis).map_err(StoreError::from)?;
            Some(Arc::new(pool))
        } else {
            None
        };

        let store = create_membership_store(&settings.membership, redis_pool.clone());
        Ok(Self::with_parts(settings, store, redis_pool))
    }

    /// Build around an existing store. Instances sharing one store behave as
    /// a cluster.
    pub fn with_store(settings: Settings, store: Arc<dyn MembershipStore>) -> Self {
        Self::with_parts(settings, store, None)
    }

    fn with_parts(
        settings: Settings,
        store: Arc<dyn MembershipStore>,
        redis_pool: Option<Arc<RedisPool>>,
    ) -> Self {
        let auth = Arc::new(AuthGate::new(&settings.jwt));
        let signer = Arc::new(JwtSigner::new(&settings.jwt));
        let sessions = Arc::new(StickySessionAssigner::new(&settings.session));
        let registry = Arc::new(ConnectionRegistry::new());
        let channels = Arc::new(ChannelIndex::new(
            store.clone(),
            CleanupPolicy::from(&settings.membership),
        ));
        let broadcaster = Arc::new(Broadcaster::new(
            settings.membership.server_id.clone(),
            registry.clone(),
            channels.clone(),
            store.clone(),
        )
        .with_presence_events(settings.membership.presence_events));

        Self {
            settings: Arc::new(settings),
            auth,
            signer,
            sessions,
            registry,
            channels,
            broadcaster,
            store,
            redis_pool,
            start_time: Instant::now(),
        }
    }

    pub fn server_id(&self) -> &str {
        self.broadcaster.server_id()
    }

    /// Relay subscriber for this instance, reconnecting with the Redis backoff settings
    pub fn relay_subscriber(&self, shutdown: broadcast::Receiver<()>) -> RelaySubscriber {
        RelaySubscriber::new(
            self.broadcaster.clone(),
            self.store.clone(),
            BackoffConfig::from(&self.settings.redis),
            shutdown,
        )
    }
}
