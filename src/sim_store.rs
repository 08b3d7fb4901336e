/// Local Simulation Store
///
/// Offline stand-in for the remote ledger: the same AMM and lifecycle, with
/// markets, positions and metadata persisted in sled. Every record key is
/// namespaced by schema version so a layout change never misreads old data.
///
/// A mutation checkpoints only the records it touches, applies to the
/// registry, then writes a sled batch. If the batch is not durable the
/// checkpoint is rolled back, so a failed action leaves no trace on either
/// side.

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::market_resolve::{
    Checkpoint, ClaimReceipt, Market, MarketManager, Outcome, Position, RegistryConfig, Side,
    TradeQuote, TradeReceipt,
};
use crate::models::{MarketMetadata, MetadataRefs};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SCHEMA_VERSION: &str = "v1";

/// Contract address recorded for simulated markets' metadata.
pub const SIM_CONTRACT_ADDRESS: &str = "local-sim";

fn market_prefix() -> String {
    format!("{}/market/", SCHEMA_VERSION)
}

fn position_prefix() -> String {
    format!("{}/position/", SCHEMA_VERSION)
}

fn meta_prefix() -> String {
    format!("{}/meta/", SCHEMA_VERSION)
}

fn market_key(id: u64) -> String {
    format!("{}{:020}", market_prefix(), id)
}

fn position_key(market_id: u64, user: &str) -> String {
    format!("{}{:020}/{}", position_prefix(), market_id, user)
}

fn meta_key(market_id: u64, contract_address: &str) -> String {
    format!("{}{:020}/{}", meta_prefix(), market_id, contract_address)
}

/// Outcome of a simulated action: an opaque handle standing in for a
/// transaction hash, plus the resulting record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimReceipt<T> {
    pub handle: String,
    pub value: T,
}

pub struct SimStore {
    db: sled::Db,
    registry: MarketManager,
    clock: Arc<dyn Clock>,
    metadata_retention: Duration,
}

impl SimStore {
    /// Open (or create) the store and rebuild the registry from disk.
    pub fn open(
        path: &Path,
        config: RegistryConfig,
        clock: Arc<dyn Clock>,
        metadata_retention: Duration,
    ) -> CoreResult<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| CoreError::Storage(format!("create {}: {}", dir.display(), e)))?;
        }
        let db = sled::open(path)?;

        let markets: Vec<Market> = load_prefix(&db, &market_prefix())?;
        let positions: Vec<Position> = load_prefix(&db, &position_prefix())?;
        info!(
            "💾 [SimStore] loaded {} markets and {} positions from {}",
            markets.len(),
            positions.len(),
            path.display()
        );

        Ok(Self {
            db,
            registry: MarketManager::from_records(config, markets, positions),
            clock,
            metadata_retention,
        })
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn registry(&self) -> &MarketManager {
        &self.registry
    }

    pub fn market(&self, market_id: u64) -> CoreResult<&Market> {
        self.registry.market(market_id)
    }

    pub fn markets(&self) -> Vec<&Market> {
        self.registry.markets()
    }

    pub fn positions_for(&self, user: &str) -> Vec<&Position> {
        self.registry.positions_for(user)
    }

    pub fn quote(&self, market_id: u64, side: Side, deposit: u128) -> CoreResult<TradeQuote> {
        self.registry.quote(market_id, side, deposit, self.now())
    }

    pub fn create_market(
        &mut self,
        question: &str,
        option_a: &str,
        option_b: &str,
        duration_secs: u64,
        creator: &str,
        metadata: MetadataRefs,
    ) -> CoreResult<SimReceipt<Market>> {
        let now = self.now();
        let checkpoint = self.registry.checkpoint_create();
        let market = self
            .registry
            .create_market(question, option_a, option_b, duration_secs, creator, now)?;

        let meta = (!metadata.is_empty())
            .then(|| metadata.into_metadata(market.id, SIM_CONTRACT_ADDRESS, now));
        self.commit(records_batch(Some(&market), None, meta.as_ref()), checkpoint)?;

        self.receipt("create", &market)
    }

    pub fn buy(
        &mut self,
        market_id: u64,
        user: &str,
        side: Side,
        deposit: u128,
    ) -> CoreResult<SimReceipt<TradeReceipt>> {
        let now = self.now();
        let checkpoint = self.registry.checkpoint(market_id, Some(user));
        let trade = self.registry.record_trade(market_id, user, side, deposit, now)?;

        self.commit(records_batch(Some(&trade.market), Some(&trade.position), None), checkpoint)?;

        self.receipt("buy", &trade)
    }

    pub fn resolve(
        &mut self,
        market_id: u64,
        outcome: Outcome,
        actor: &str,
    ) -> CoreResult<SimReceipt<Market>> {
        let now = self.now();
        let checkpoint = self.registry.checkpoint(market_id, None);
        let market = self.registry.resolve(market_id, outcome, actor, now)?;

        self.commit(records_batch(Some(&market), None, None), checkpoint)?;

        self.receipt("resolve", &market)
    }

    pub fn cancel(&mut self, market_id: u64, actor: &str) -> CoreResult<SimReceipt<Market>> {
        self.resolve(market_id, Outcome::Cancelled, actor)
    }

    pub fn claim(&mut self, market_id: u64, user: &str) -> CoreResult<SimReceipt<ClaimReceipt>> {
        let now = self.now();
        let checkpoint = self.registry.checkpoint(market_id, Some(user));
        let claim = self.registry.claim(market_id, user, now)?;

        self.commit(records_batch(None, Some(&claim.position), None), checkpoint)?;

        self.receipt("claim", &claim)
    }

    // ========================================================================
    // METADATA
    // ========================================================================

    pub fn put_metadata(&self, meta: &MarketMetadata) -> CoreResult<()> {
        self.db.insert(
            meta_key(meta.market_id, &meta.contract_address).as_bytes(),
            bincode::serialize(meta)?,
        )?;
        self.db.flush()?;
        Ok(())
    }

    pub fn metadata(&self, market_id: u64, contract_address: &str) -> CoreResult<Option<MarketMetadata>> {
        match self.db.get(meta_key(market_id, contract_address).as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Periodic maintenance: drop metadata older than the retention window.
    pub fn purge_stale_metadata(&self) -> CoreResult<usize> {
        let cutoff = self.now().saturating_sub(self.metadata_retention.as_secs());
        let mut removed = 0;

        for entry in self.db.scan_prefix(meta_prefix().as_bytes()) {
            let (key, value) = entry?;
            let meta: MarketMetadata = match bincode::deserialize(&value) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("[SimStore] dropping unreadable metadata record: {}", e);
                    self.db.remove(&key)?;
                    removed += 1;
                    continue;
                }
            };
            if meta.stored_at < cutoff {
                self.db.remove(&key)?;
                removed += 1;
            }
        }

        if removed > 0 {
            self.db.flush()?;
            info!("🧹 [SimStore] purged {} stale metadata records", removed);
        }
        Ok(removed)
    }

    /// Make the batch durable, or undo the in-memory change.
    fn commit(&mut self, batch: CoreResult<sled::Batch>, checkpoint: Checkpoint) -> CoreResult<()> {
        let written = batch.and_then(|batch| {
            self.db.apply_batch(batch)?;
            self.db.flush()?;
            Ok(())
        });
        if let Err(e) = &written {
            warn!("⚠️ [SimStore] write failed, rolling back: {}", e);
            self.registry.rollback(checkpoint);
        }
        written
    }

    fn receipt<T: Serialize + Clone>(&self, op: &str, value: &T) -> CoreResult<SimReceipt<T>> {
        let seq = self.db.generate_id()?;
        let mut hasher = Sha256::new();
        hasher.update(SCHEMA_VERSION.as_bytes());
        hasher.update(op.as_bytes());
        hasher.update(seq.to_be_bytes());
        hasher.update(bincode::serialize(value)?);
        let handle = format!("0x{}", hex::encode(hasher.finalize()));
        debug!("[SimStore] {} committed as {}", op, handle);
        Ok(SimReceipt {
            handle,
            value: value.clone(),
        })
    }
}

fn records_batch(
    market: Option<&Market>,
    position: Option<&Position>,
    meta: Option<&MarketMetadata>,
) -> CoreResult<sled::Batch> {
    let mut batch = sled::Batch::default();
    if let Some(market) = market {
        batch.insert(market_key(market.id).as_bytes(), bincode::serialize(market)?);
    }
    if let Some(position) = position {
        batch.insert(
            position_key(position.market_id, &position.user).as_bytes(),
            bincode::serialize(position)?,
        );
    }
    if let Some(meta) = meta {
        batch.insert(
            meta_key(meta.market_id, &meta.contract_address).as_bytes(),
            bincode::serialize(meta)?,
        );
    }
    Ok(batch)
}

fn load_prefix<T: serde::de::DeserializeOwned>(db: &sled::Db, prefix: &str) -> CoreResult<Vec<T>> {
    let mut records = Vec::new();
    for entry in db.scan_prefix(prefix.as_bytes()) {
        let (_, value) = entry?;
        records.push(bincode::deserialize(&value)?);
    }
    Ok(records)
}
