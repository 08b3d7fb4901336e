use crate::error::{CoreError, ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Prefix `CoreError::user_message` puts on ledger rejections.
const REVERT_PREFIX: &str = "Transaction reverted: ";

/// Finished actions kept per wallet; outstanding ones are never dropped.
pub const DEFAULT_HISTORY_PER_WALLET: usize = 100;

// ============================================================================
// ACTION KIND & STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Authorize,
    CreateMarket,
    Buy,
    Claim,
    Resolve,
    Cancel,
}

impl ActionKind {
    /// Kinds that move or authorize tokens; at most one per wallet at a time.
    pub fn is_spend_bearing(&self) -> bool {
        matches!(self, ActionKind::Authorize | ActionKind::Buy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Authorize => "authorize",
            ActionKind::CreateMarket => "create_market",
            ActionKind::Buy => "buy",
            ActionKind::Claim => "claim",
            ActionKind::Resolve => "resolve",
            ActionKind::Cancel => "cancel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Waiting for the wallet; no handle yet, abandoning has no side effect
    AwaitingSignature,
    /// Handle obtained
    Submitted,
    /// Polling for the receipt
    Confirming,
    Confirmed,
    Failed,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionStatus::Confirmed | ActionStatus::Failed)
    }
}

// ============================================================================
// PENDING ACTION
// ============================================================================

/// Lifecycle record of one state-changing request. Each transition produces
/// a new record that replaces the old one wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: Uuid,
    pub kind: ActionKind,
    pub wallet: String,
    /// Ledger handle (transaction hash), absent while awaiting signature
    pub handle: Option<String>,
    pub status: ActionStatus,
    /// Set only when failed
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl PendingAction {
    pub fn new(kind: ActionKind, wallet: &str, now: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            wallet: wallet.to_string(),
            handle: None,
            status: ActionStatus::AwaitingSignature,
            error_kind: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn submitted(&self, handle: String, now: u64) -> Self {
        Self {
            handle: Some(handle),
            status: ActionStatus::Submitted,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn confirming(&self, now: u64) -> Self {
        Self {
            status: ActionStatus::Confirming,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn confirmed(&self, now: u64) -> Self {
        Self {
            status: ActionStatus::Confirmed,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn failed(&self, err: &CoreError, now: u64) -> Self {
        Self {
            status: ActionStatus::Failed,
            error_kind: Some(err.kind()),
            error_message: Some(err.user_message()),
            updated_at: now,
            ..self.clone()
        }
    }

    /// Terminal result for callers awaiting a submitted action.
    pub fn into_result(self) -> Result<PendingAction, CoreError> {
        let message = self
            .error_message
            .clone()
            .unwrap_or_else(|| format!("{} did not confirm", self.kind.as_str()));
        match (self.status, self.error_kind) {
            (ActionStatus::Confirmed, _) => Ok(self),
            (_, Some(ErrorKind::Transient)) => Err(CoreError::DataUnavailable(message)),
            (_, Some(ErrorKind::Internal)) => Err(CoreError::Internal(message)),
            _ => {
                let reason = message.strip_prefix(REVERT_PREFIX).unwrap_or(&message).to_string();
                Err(CoreError::LedgerRejected(reason))
            }
        }
    }
}

// ============================================================================
// ACTION TRACKER
// ============================================================================

/// Every outstanding action plus the most recent finished ones, by id.
#[derive(Debug, Clone)]
pub struct ActionTracker {
    actions: Arc<RwLock<HashMap<Uuid, PendingAction>>>,
    history_per_wallet: usize,
}

impl Default for ActionTracker {
    fn default() -> Self {
        Self::with_history(DEFAULT_HISTORY_PER_WALLET)
    }
}

impl ActionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history_per_wallet: usize) -> Self {
        Self {
            actions: Arc::new(RwLock::new(HashMap::new())),
            history_per_wallet,
        }
    }

    /// Insert or replace the whole record. A record turning terminal may push
    /// the wallet's oldest finished action out of the history.
    pub async fn record(&self, action: PendingAction) {
        let finished_wallet = action.status.is_terminal().then(|| action.wallet.clone());
        let mut actions = self.actions.write().await;
        actions.insert(action.id, action);
        if let Some(wallet) = finished_wallet {
            prune_finished(&mut actions, &wallet, self.history_per_wallet);
        }
    }

    pub async fn get(&self, id: &Uuid) -> Option<PendingAction> {
        self.actions.read().await.get(id).cloned()
    }

    /// Every action for `wallet`, oldest first.
    pub async fn for_wallet(&self, wallet: &str) -> Vec<PendingAction> {
        let mut actions: Vec<PendingAction> = self
            .actions
            .read()
            .await
            .values()
            .filter(|a| a.wallet == wallet)
            .cloned()
            .collect();
        actions.sort_by_key(|a| a.created_at);
        actions
    }

    pub async fn outstanding(&self) -> Vec<PendingAction> {
        self.actions
            .read()
            .await
            .values()
            .filter(|a| !a.status.is_terminal())
            .cloned()
            .collect()
    }
}

fn prune_finished(actions: &mut HashMap<Uuid, PendingAction>, wallet: &str, keep: usize) {
    let mut finished: Vec<(u64, u64, Uuid)> = actions
        .values()
        .filter(|a| a.wallet == wallet && a.status.is_terminal())
        .map(|a| (a.updated_at, a.created_at, a.id))
        .collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort();
    let excess = finished.len() - keep;
    for (_, _, id) in finished.into_iter().take(excess) {
        actions.remove(&id);
    }
}
