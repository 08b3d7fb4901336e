// Application state: the local simulation store, the remote-ledger session
// (cached views + orchestrator) and the polling scheduler that keeps them
// fresh.

use crate::amount::AmountCodec;
use crate::chain_reader::{ChainReader, Read, RemoteMarket, RemoteShares};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::CoreResult;
use crate::models::MarketMetadata;
use crate::orchestrator::{Orchestrator, OrchestratorConfig, RpcWallet};
use crate::rpc::{EndpointSet, HttpTransport, RetryPolicy, RpcTransport};
use crate::sim_store::SimStore;
use crate::spend_gate::AllowanceState;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Notify, RwLock};
use tracing::{debug, info, warn};

pub type SharedState = Arc<AppState>;

/// How often simulation metadata past its retention window is purged.
pub const METADATA_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

// ============================================================================
// SESSION VIEWS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Refreshing,
    /// Last refresh could not complete; previous views are kept
    Error(String),
}

/// Derived views of the remote ledger for one wallet. Each field is swapped
/// as a whole on refresh, so readers never observe a half-written view.
pub struct SessionState {
    wallet: String,
    allowance: RwLock<Option<AllowanceState>>,
    markets: RwLock<Arc<Vec<RemoteMarket>>>,
    positions: RwLock<Arc<HashMap<u64, RemoteShares>>>,
    status: RwLock<SyncStatus>,
    last_refresh: RwLock<Option<u64>>,
}

/// Snapshot handed to the intent layer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub wallet: String,
    pub allowance: Option<AllowanceState>,
    pub has_unlimited_allowance: bool,
    pub markets: Vec<RemoteMarket>,
    pub positions: HashMap<u64, RemoteShares>,
    pub status: SyncStatus,
    pub last_refresh: Option<u64>,
}

impl SessionState {
    pub fn new(wallet: impl Into<String>) -> Self {
        Self {
            wallet: wallet.into(),
            allowance: RwLock::new(None),
            markets: RwLock::new(Arc::new(Vec::new())),
            positions: RwLock::new(Arc::new(HashMap::new())),
            status: RwLock::new(SyncStatus::Idle),
            last_refresh: RwLock::new(None),
        }
    }

    pub fn wallet(&self) -> &str {
        &self.wallet
    }

    pub async fn allowance(&self) -> Option<AllowanceState> {
        *self.allowance.read().await
    }

    pub async fn markets(&self) -> Arc<Vec<RemoteMarket>> {
        self.markets.read().await.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let allowance = self.allowance().await;
        SessionSnapshot {
            wallet: self.wallet.clone(),
            allowance,
            has_unlimited_allowance: allowance.map_or(false, |a| a.has_unlimited_allowance()),
            markets: self.markets.read().await.as_ref().clone(),
            positions: self.positions.read().await.as_ref().clone(),
            status: self.status.read().await.clone(),
            last_refresh: *self.last_refresh.read().await,
        }
    }

    /// One refresh cycle. Each view that read successfully replaces the
    /// cached one; views that could not be read keep their last value.
    pub async fn refresh(&self, reader: &ChainReader, now: u64) -> SyncStatus {
        *self.status.write().await = SyncStatus::Refreshing;
        debug!("🔄 [Poller] refreshing views for {}", self.wallet);

        match reader.get_allowance_state(&self.wallet).await {
            Read::Ready(state) => *self.allowance.write().await = Some(state),
            _ => warn!("⚠️ [Poller] balance/allowance unavailable, keeping cached value"),
        }

        let status = match reader.load_all_markets().await {
            Ok(load) => {
                let mut positions = HashMap::new();
                for market in &load.markets {
                    if let Read::Ready(shares) = reader.get_user_shares(market.id, &self.wallet).await {
                        if shares.shares_a > 0 || shares.shares_b > 0 {
                            positions.insert(market.id, shares);
                        }
                    }
                }
                let complete = load.is_complete();
                let summary = load.summary();
                *self.markets.write().await = Arc::new(load.markets);
                *self.positions.write().await = Arc::new(positions);
                if complete {
                    SyncStatus::Idle
                } else {
                    SyncStatus::Error(summary)
                }
            }
            Err(e) => {
                warn!("❌ [Poller] market refresh failed: {}", e);
                SyncStatus::Error(e.user_message())
            }
        };

        *self.last_refresh.write().await = Some(now);
        *self.status.write().await = status.clone();
        status
    }
}

// ============================================================================
// POLLER
// ============================================================================

/// Fixed-interval scheduler. Refreshes the session views, reacts early to
/// confirmed actions, and runs metadata maintenance on the simulation store.
pub struct Poller {
    pub session: Option<(Arc<SessionState>, Arc<ChainReader>)>,
    pub sim: Option<Arc<Mutex<SimStore>>>,
    pub refresh_interval: Duration,
    pub purge_interval: Duration,
    /// Fired by the orchestrator on every confirmation
    pub refresh_signal: Arc<Notify>,
    pub clock: Arc<dyn Clock>,
}

impl Poller {
    /// Run until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut refresh_tick = tokio::time::interval(self.refresh_interval);
        let mut purge_tick = tokio::time::interval(self.purge_interval);
        info!(
            "⏱️ [Poller] started: refresh every {:?}, purge every {:?}",
            self.refresh_interval, self.purge_interval
        );

        loop {
            tokio::select! {
                _ = refresh_tick.tick() => self.refresh_once().await,
                _ = self.refresh_signal.notified() => self.refresh_once().await,
                _ = purge_tick.tick() => self.purge_once().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("🛑 [Poller] stopped");
    }

    async fn refresh_once(&self) {
        if let Some((session, reader)) = &self.session {
            session.refresh(reader, self.clock.now()).await;
        }
    }

    async fn purge_once(&self) {
        if let Some(sim) = &self.sim {
            if let Err(e) = sim.lock().await.purge_stale_metadata() {
                warn!("⚠️ [Poller] metadata purge failed: {}", e);
            }
        }
    }
}

// ============================================================================
// APP STATE
// ============================================================================

/// Remote-ledger half of the application, present only when configured.
pub struct LedgerSession {
    pub session: Arc<SessionState>,
    pub reader: Arc<ChainReader>,
    pub orchestrator: Orchestrator,
}

pub struct AppState {
    pub config: EngineConfig,
    pub codec: AmountCodec,
    pub clock: Arc<dyn Clock>,
    pub sim: Arc<Mutex<SimStore>>,
    pub ledger: Option<LedgerSession>,
}

impl AppState {
    /// Build everything from validated configuration. Returns the metadata
    /// feed when a remote ledger is configured.
    pub fn from_config(
        config: EngineConfig,
    ) -> CoreResult<(Self, Option<mpsc::UnboundedReceiver<MarketMetadata>>)> {
        let registry = config.validate()?;
        let codec = config.codec()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let sim = SimStore::open(
            &config.sim_data_dir,
            registry.clone(),
            clock.clone(),
            config.metadata_retention,
        )?;
        info!("💾 [SimStore] local simulation ready at {}", config.sim_data_dir.display());

        let (ledger, metadata_rx) = match (
            config.has_remote_ledger(),
            &config.market_contract,
            &config.token_contract,
            &config.wallet_address,
        ) {
            (true, Some(market), Some(token), Some(wallet)) => {
                let transports: Vec<Arc<dyn RpcTransport>> = config
                    .rpc_urls
                    .iter()
                    .map(|url| Arc::new(HttpTransport::new(url.clone(), config.rpc_timeout)) as Arc<dyn RpcTransport>)
                    .collect();

                let reader = Arc::new(ChainReader::new(
                    EndpointSet::new(transports.clone(), RetryPolicy::new(config.rpc_retry_delay)),
                    market.clone(),
                    token.clone(),
                    config.bulk_read_delay,
                    clock.clone(),
                ));
                let wallet_impl = Arc::new(RpcWallet::new(
                    wallet.clone(),
                    EndpointSet::new(transports, RetryPolicy::single_shot()),
                ));
                let (orchestrator, metadata_rx) = Orchestrator::new(
                    wallet_impl,
                    reader.clone(),
                    OrchestratorConfig {
                        market_contract: market.clone(),
                        token_contract: token.clone(),
                        poll_interval: config.confirmation_poll_interval,
                        registry,
                        authorize_unlimited: true,
                    },
                );
                info!("🔗 [ChainReader] {} endpoint(s), market contract {}", config.rpc_urls.len(), market);

                let session = LedgerSession {
                    session: Arc::new(SessionState::new(wallet.clone())),
                    reader,
                    orchestrator,
                };
                (Some(session), Some(metadata_rx))
            }
            (true, _, _, None) => {
                warn!("⚠️ RPC_URLS set without WALLET_ADDRESS, remote ledger disabled");
                (None, None)
            }
            _ => {
                info!("ℹ️ no remote ledger configured, local simulation only");
                (None, None)
            }
        };

        Ok((
            Self {
                config,
                codec,
                clock,
                sim: Arc::new(Mutex::new(sim)),
                ledger,
            },
            metadata_rx,
        ))
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Scheduler wired to this state's components.
    pub fn poller(&self) -> Poller {
        Poller {
            session: self
                .ledger
                .as_ref()
                .map(|l| (l.session.clone(), l.reader.clone())),
            sim: Some(self.sim.clone()),
            refresh_interval: self.config.refresh_interval,
            purge_interval: METADATA_PURGE_INTERVAL,
            refresh_signal: self
                .ledger
                .as_ref()
                .map(|l| l.orchestrator.refresh_signal())
                .unwrap_or_else(|| Arc::new(Notify::new())),
            clock: self.clock.clone(),
        }
    }
}

/// Persist metadata emitted by confirmed remote market creations into the
/// simulation store's metadata table. Never blocks the orchestrator.
pub async fn run_metadata_sink(
    sim: Arc<Mutex<SimStore>>,
    mut metadata_rx: mpsc::UnboundedReceiver<MarketMetadata>,
) {
    while let Some(meta) = metadata_rx.recv().await {
        match sim.lock().await.put_metadata(&meta) {
            Ok(()) => info!("🏷️ metadata stored for market {} @ {}", meta.market_id, meta.contract_address),
            Err(e) => warn!("⚠️ metadata for market {} not stored: {}", meta.market_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::market_resolve::RegistryConfig;
    use crate::models::MetadataRefs;

    fn sim(dir: &std::path::Path, clock: Arc<ManualClock>) -> Arc<Mutex<SimStore>> {
        let store = SimStore::open(
            &dir.join("sim"),
            RegistryConfig::default(),
            clock,
            Duration::from_secs(60),
        )
        .unwrap();
        Arc::new(Mutex::new(store))
    }

    #[tokio::test]
    async fn test_poller_stops_on_shutdown() {
        let temp_dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let poller = Poller {
            session: None,
            sim: Some(sim(temp_dir.path(), clock.clone())),
            refresh_interval: Duration::from_millis(5),
            purge_interval: Duration::from_millis(5),
            refresh_signal: Arc::new(Notify::new()),
            clock,
        };

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_poller_purges_stale_metadata() {
        let temp_dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let store = sim(temp_dir.path(), clock.clone());
        let refs = MetadataRefs {
            image_ref: Some("ipfs://x".into()),
            ..MetadataRefs::default()
        };
        store.lock().await.put_metadata(&refs.into_metadata(0, "0xabc", 1_000)).unwrap();
        clock.advance(3_600);

        let poller = Poller {
            session: None,
            sim: Some(store.clone()),
            refresh_interval: Duration::from_secs(60),
            purge_interval: Duration::from_millis(5),
            refresh_signal: Arc::new(Notify::new()),
            clock,
        };
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(tx);
        handle.await.unwrap();

        assert!(store.lock().await.metadata(0, "0xabc").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_metadata_sink_persists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = sim(temp_dir.path(), Arc::new(ManualClock::new(1_000)));
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(MetadataRefs::default().into_metadata(4, "0xabc", 1_000)).unwrap();
        drop(tx);

        run_metadata_sink(store.clone(), rx).await;
        assert!(store.lock().await.metadata(4, "0xabc").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_new_session_is_empty() {
        let session = SessionState::new("0xme");
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.wallet, "0xme");
        assert!(snapshot.allowance.is_none());
        assert!(!snapshot.has_unlimited_allowance);
        assert!(snapshot.markets.is_empty());
        assert_eq!(snapshot.status, SyncStatus::Idle);
    }
}
