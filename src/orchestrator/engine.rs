use super::action::{ActionKind, ActionStatus, ActionTracker, PendingAction};
use super::wallet::{TxRequest, Wallet};
use crate::chain_reader::{LedgerView, Read, ReceiptStatus, RemoteMarket, RemoteShares};
use crate::error::{CoreError, CoreResult};
use crate::market_resolve::{Outcome, RegistryConfig, Side};
use crate::models::{MarketMetadata, MetadataRefs};
use crate::rpc::AbiError;
use crate::spend_gate::{GateDecision, UNLIMITED_AUTHORIZATION};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub market_contract: String,
    pub token_contract: String,
    /// Pause between receipt polls
    pub poll_interval: Duration,
    /// Limits checked locally before anything is submitted
    pub registry: RegistryConfig,
    /// Authorize the maximum instead of the exact amount when the gate asks
    pub authorize_unlimited: bool,
}

/// How much an Authorize action should approve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Exact(u128),
    Unlimited,
}

impl Authorization {
    pub fn amount(&self) -> u128 {
        match self {
            Authorization::Exact(amount) => *amount,
            Authorization::Unlimited => UNLIMITED_AUTHORIZATION,
        }
    }
}

/// A submitted action. Dropping it does not stop confirmation tracking.
#[derive(Debug)]
pub struct Submission {
    pub action: PendingAction,
    completion: JoinHandle<PendingAction>,
}

impl Submission {
    /// Wait for the terminal status.
    pub async fn wait(self) -> CoreResult<PendingAction> {
        let action = self
            .completion
            .await
            .map_err(|e| CoreError::Internal(format!("confirmation task: {}", e)))?;
        action.into_result()
    }
}

/// Per-wallet lock for spend-bearing actions, released on drop.
pub struct InFlightGuard {
    wallet: String,
    set: Arc<Mutex<HashSet<String>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.wallet);
    }
}

/// Transaction Orchestrator
///
/// Drives every write through AwaitingSignature → Submitted → Confirming →
/// Confirmed | Failed, and composes authorize-then-act flows into one call.
#[derive(Clone)]
pub struct Orchestrator {
    wallet: Arc<dyn Wallet>,
    ledger: Arc<dyn LedgerView>,
    config: OrchestratorConfig,
    tracker: ActionTracker,
    in_flight: Arc<Mutex<HashSet<String>>>,
    metadata_tx: mpsc::UnboundedSender<MarketMetadata>,
    refresh: Arc<Notify>,
}

impl Orchestrator {
    /// Returns the orchestrator and the receiving end of the metadata feed.
    pub fn new(
        wallet: Arc<dyn Wallet>,
        ledger: Arc<dyn LedgerView>,
        config: OrchestratorConfig,
    ) -> (Self, mpsc::UnboundedReceiver<MarketMetadata>) {
        let (metadata_tx, metadata_rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            wallet,
            ledger,
            config,
            tracker: ActionTracker::new(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            metadata_tx,
            refresh: Arc::new(Notify::new()),
        };
        (orchestrator, metadata_rx)
    }

    pub fn wallet_address(&self) -> &str {
        self.wallet.address()
    }

    pub fn tracker(&self) -> &ActionTracker {
        &self.tracker
    }

    /// Fired after every confirmed action so cached views can refresh.
    pub fn refresh_signal(&self) -> Arc<Notify> {
        self.refresh.clone()
    }

    // ========================================================================
    // PUBLIC FLOWS
    // ========================================================================

    /// Standalone Authorize action.
    pub async fn authorize(&self, authorization: Authorization) -> CoreResult<Submission> {
        let guard = self.acquire()?;
        let request = self.build(TxRequest::approve(
            &self.config.token_contract,
            &self.config.market_contract,
            authorization.amount(),
        ))?;
        self.submit(request, Some(guard), None).await
    }

    /// Gate → (authorize, await, re-check) → re-validate market → submit.
    pub async fn buy(&self, market_id: u64, side: Side, amount: u128) -> CoreResult<Submission> {
        if amount < self.config.registry.min_stake {
            return Err(CoreError::InvalidAmount(format!(
                "deposit {} below minimum stake {}",
                amount, self.config.registry.min_stake
            )));
        }
        let guard = self.acquire()?;

        let market = self.load_market(market_id).await?;
        check_tradable(&market, self.ledger.now())?;

        let state = self.ledger.allowance_state(self.wallet.address()).await.require("balance and allowance")?;
        match state.evaluate(amount) {
            GateDecision::Proceed => {}
            GateDecision::InsufficientBalance => {
                return Err(CoreError::InsufficientBalance {
                    available: state.balance,
                    requested: amount,
                })
            }
            GateDecision::RequireAuthorization => {
                info!(
                    "🔐 [Orchestrator] allowance {} below {}, authorizing first",
                    state.allowance, amount
                );
                let authorization = if self.config.authorize_unlimited {
                    Authorization::Unlimited
                } else {
                    Authorization::Exact(amount)
                };
                let request = self.build(TxRequest::approve(
                    &self.config.token_contract,
                    &self.config.market_contract,
                    authorization.amount(),
                ))?;
                // the buy keeps holding the lock, so the authorize step runs without one
                self.submit(request, None, None).await?.wait().await?;

                let fresh = self
                    .ledger
                    .allowance_state(self.wallet.address())
                    .await
                    .require("balance and allowance")?;
                match fresh.evaluate(amount) {
                    GateDecision::Proceed => {}
                    GateDecision::RequireAuthorization => {
                        return Err(CoreError::ConditionsChanged(
                            "allowance changed after authorization".to_string(),
                        ))
                    }
                    GateDecision::InsufficientBalance => {
                        return Err(CoreError::ConditionsChanged(
                            "balance changed after authorization".to_string(),
                        ))
                    }
                }
            }
        }

        self.revalidate_tradable(market_id).await?;
        let request = self.build(TxRequest::buy(&self.config.market_contract, market_id, side, amount))?;
        self.submit(request, Some(guard), None).await
    }

    pub async fn create_market(
        &self,
        question: &str,
        option_a: &str,
        option_b: &str,
        duration_secs: u64,
        metadata: MetadataRefs,
    ) -> CoreResult<Submission> {
        let limits = &self.config.registry;
        if duration_secs < limits.min_duration_secs || duration_secs > limits.max_duration_secs {
            return Err(CoreError::InvalidDuration {
                requested: duration_secs,
                min: limits.min_duration_secs,
                max: limits.max_duration_secs,
            });
        }
        for (field, value) in [("question", question), ("option A", option_a), ("option B", option_b)] {
            if value.trim().is_empty() {
                return Err(CoreError::InvalidInput(format!("{} must not be empty", field)));
            }
        }

        let request = self.build(TxRequest::create_market(
            &self.config.market_contract,
            question.trim(),
            option_a.trim(),
            option_b.trim(),
            duration_secs,
        ))?;
        self.submit(request, None, Some(metadata)).await
    }

    pub async fn claim(&self, market_id: u64) -> CoreResult<Submission> {
        let market = self.load_market(market_id).await?;
        if !market.resolved {
            return Err(CoreError::MarketNotResolved(market_id));
        }
        let shares = match self.ledger.user_shares(market_id, self.wallet.address()).await {
            Read::Ready(shares) => shares,
            Read::NotFound => RemoteShares { shares_a: 0, shares_b: 0 },
            Read::Unavailable => {
                return Err(CoreError::DataUnavailable(format!("shares in market {}", market_id)))
            }
        };
        if !has_winnings(&market, &shares) {
            debug!("[Orchestrator] nothing to claim in market {}", market_id);
            return Err(CoreError::NoWinningsToClaim(market_id));
        }
        let request = self.build(TxRequest::claim(&self.config.market_contract, market_id))?;
        self.submit(request, None, None).await
    }

    pub async fn resolve(&self, market_id: u64, outcome: Outcome) -> CoreResult<Submission> {
        if outcome == Outcome::Unresolved {
            return Err(CoreError::InvalidInput(
                "cannot resolve a market to Unresolved".to_string(),
            ));
        }
        let market = self.load_market(market_id).await?;
        check_resolvable(&market, self.ledger.now())?;

        // resolution is time-gated too, so check again right before signing
        let fresh = self.load_market(market_id).await?;
        if fresh.resolved {
            return Err(CoreError::ConditionsChanged(format!(
                "market {} was resolved meanwhile",
                market_id
            )));
        }

        let request = self.build(TxRequest::resolve(&self.config.market_contract, market_id, outcome))?;
        self.submit(request, None, None).await
    }

    pub async fn cancel(&self, market_id: u64) -> CoreResult<Submission> {
        self.resolve(market_id, Outcome::Cancelled).await
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn acquire(&self) -> CoreResult<InFlightGuard> {
        let wallet = self.wallet.address().to_string();
        let mut set = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !set.insert(wallet.clone()) {
            warn!("⛔ [Orchestrator] spend already in flight for {}", wallet);
            return Err(CoreError::ActionAlreadyInFlight(wallet));
        }
        Ok(InFlightGuard {
            wallet,
            set: self.in_flight.clone(),
        })
    }

    fn build(&self, request: Result<TxRequest, AbiError>) -> CoreResult<TxRequest> {
        request.map_err(|e| CoreError::InvalidInput(e.to_string()))
    }

    async fn load_market(&self, market_id: u64) -> CoreResult<RemoteMarket> {
        match self.ledger.market(market_id).await {
            Read::Ready(market) => Ok(market),
            Read::NotFound => Err(CoreError::MarketNotFound(market_id)),
            Read::Unavailable => Err(CoreError::DataUnavailable(format!("market {}", market_id))),
        }
    }

    async fn revalidate_tradable(&self, market_id: u64) -> CoreResult<()> {
        let market = self.load_market(market_id).await?;
        check_tradable(&market, self.ledger.now()).map_err(|e| {
            CoreError::ConditionsChanged(e.to_string())
        })
    }

    /// Obtain a handle, then hand confirmation to a detached task that runs
    /// to a terminal status whether or not anyone is still waiting.
    async fn submit(
        &self,
        request: TxRequest,
        guard: Option<InFlightGuard>,
        metadata: Option<MetadataRefs>,
    ) -> CoreResult<Submission> {
        let now = self.ledger.now();
        let pending = PendingAction::new(request.kind, self.wallet.address(), now);
        self.tracker.record(pending.clone()).await;
        debug!("[Orchestrator] {} {} awaiting signature", request.kind.as_str(), pending.id);

        let handle = match self.wallet.submit_action(&request).await {
            Ok(handle) => handle,
            Err(err) => {
                let err = CoreError::from(err);
                warn!("❌ [Orchestrator] {} not submitted: {}", request.kind.as_str(), err);
                self.tracker.record(pending.failed(&err, self.ledger.now())).await;
                return Err(err);
            }
        };

        let submitted = pending.submitted(handle.clone(), self.ledger.now());
        self.tracker.record(submitted.clone()).await;
        info!("📤 [Orchestrator] {} submitted as {}", request.kind.as_str(), handle);

        let this = self.clone();
        let tracked = submitted.clone();
        let completion = tokio::spawn(async move {
            let terminal = this.confirm(tracked, metadata).await;
            drop(guard);
            terminal
        });

        Ok(Submission {
            action: submitted,
            completion,
        })
    }

    /// Poll until the receipt shows up. No timeout beyond the transport's.
    async fn confirm(&self, submitted: PendingAction, metadata: Option<MetadataRefs>) -> PendingAction {
        let handle = submitted.handle.clone().unwrap_or_default();
        let confirming = submitted.confirming(self.ledger.now());
        self.tracker.record(confirming.clone()).await;

        let terminal = loop {
            match self.ledger.receipt(&handle).await {
                Read::Ready(ReceiptStatus::Success) => break confirming.confirmed(self.ledger.now()),
                Read::Ready(ReceiptStatus::Reverted(reason)) => {
                    break confirming.failed(&CoreError::LedgerRejected(reason), self.ledger.now())
                }
                Read::NotFound | Read::Unavailable => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        };
        self.tracker.record(terminal.clone()).await;

        match terminal.status {
            ActionStatus::Confirmed => {
                info!("✅ [Orchestrator] {} {} confirmed", terminal.kind.as_str(), handle);
                if terminal.kind == ActionKind::CreateMarket {
                    self.emit_metadata(metadata.unwrap_or_default()).await;
                }
                self.refresh.notify_one();
            }
            _ => {
                error!(
                    "❌ [Orchestrator] {} {} failed: {}",
                    terminal.kind.as_str(),
                    handle,
                    terminal.error_message.as_deref().unwrap_or("unknown")
                );
            }
        }
        terminal
    }

    /// The new market is the last index once the creation is mined.
    async fn emit_metadata(&self, refs: MetadataRefs) {
        let market_id = match self.ledger.market_count().await {
            Read::Ready(count) if count > 0 => count - 1,
            _ => {
                warn!("⚠️ [Orchestrator] created market id unknown, metadata not emitted");
                return;
            }
        };
        let meta = refs.into_metadata(market_id, &self.config.market_contract, self.ledger.now());
        if self.metadata_tx.send(meta).is_err() {
            debug!("[Orchestrator] metadata receiver gone");
        }
    }
}

fn check_tradable(market: &RemoteMarket, now: u64) -> CoreResult<()> {
    if market.resolved {
        return Err(CoreError::MarketAlreadyResolved(market.id));
    }
    if now >= market.end_time {
        return Err(CoreError::MarketTradingEnded(market.id));
    }
    Ok(())
}

/// Winning-side shares, or any shares at all once cancelled.
fn has_winnings(market: &RemoteMarket, shares: &RemoteShares) -> bool {
    match market.outcome {
        Outcome::OptionA => shares.shares_a > 0,
        Outcome::OptionB => shares.shares_b > 0,
        Outcome::Cancelled => shares.shares_a > 0 || shares.shares_b > 0,
        Outcome::Unresolved => false,
    }
}

fn check_resolvable(market: &RemoteMarket, now: u64) -> CoreResult<()> {
    if market.resolved {
        return Err(CoreError::MarketAlreadyResolved(market.id));
    }
    if now < market.end_time {
        return Err(CoreError::MarketNotEnded(market.id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::orchestrator::wallet::WalletError;
    use crate::spend_gate::AllowanceState;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

    const MARKET: &str = "0x00000000000000000000000000000000000000aa";
    const TOKEN: &str = "0x00000000000000000000000000000000000000bb";
    const ME: &str = "0x00000000000000000000000000000000000000cc";
    const UNIT: u128 = 1_000_000;

    /// In-memory ledger: applies submitted actions when their receipt is polled.
    struct MockLedger {
        now: AtomicU64,
        state: Mutex<LedgerState>,
        /// receipt polls that report "pending" before the answer
        pending_polls: AtomicU32,
        allowance_reads: AtomicU32,
        /// revoke the allowance once this many reads have been answered
        revoke_after_reads: Option<u32>,
    }

    struct LedgerState {
        balance: u128,
        allowance: u128,
        markets: Vec<RemoteMarket>,
        receipts: HashMap<String, ReceiptStatus>,
        shares: RemoteShares,
        approvals: u32,
        buys: u32,
        claims: u32,
    }

    impl MockLedger {
        fn new(balance: u128, allowance: u128) -> Arc<Self> {
            Arc::new(Self {
                now: AtomicU64::new(1_000),
                state: Mutex::new(LedgerState {
                    balance,
                    allowance,
                    markets: vec![RemoteMarket {
                        id: 0,
                        question: "Rain?".into(),
                        option_a: "Yes".into(),
                        option_b: "No".into(),
                        end_time: 5_000,
                        outcome: Outcome::Unresolved,
                        total_shares_a: 0,
                        total_shares_b: 0,
                        resolved: false,
                    }],
                    receipts: HashMap::new(),
                    shares: RemoteShares { shares_a: 0, shares_b: 0 },
                    approvals: 0,
                    buys: 0,
                    claims: 0,
                }),
                pending_polls: AtomicU32::new(1),
                allowance_reads: AtomicU32::new(0),
                revoke_after_reads: None,
            })
        }
    }

    #[async_trait]
    impl LedgerView for MockLedger {
        async fn allowance_state(&self, _owner: &str) -> Read<AllowanceState> {
            let reads = self.allowance_reads.fetch_add(1, Ordering::SeqCst) + 1;
            let mut state = self.state.lock().unwrap();
            if self.revoke_after_reads.map_or(false, |n| reads > n) {
                state.allowance = 0;
            }
            Read::Ready(AllowanceState::new(state.balance, state.allowance, self.now()))
        }

        async fn market(&self, market_id: u64) -> Read<RemoteMarket> {
            match self.state.lock().unwrap().markets.get(market_id as usize) {
                Some(m) => Read::Ready(m.clone()),
                None => Read::NotFound,
            }
        }

        async fn market_count(&self) -> Read<u64> {
            Read::Ready(self.state.lock().unwrap().markets.len() as u64)
        }

        async fn user_shares(&self, _market_id: u64, _user: &str) -> Read<RemoteShares> {
            Read::Ready(self.state.lock().unwrap().shares)
        }

        async fn receipt(&self, handle: &str) -> Read<ReceiptStatus> {
            if self
                .pending_polls
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Read::NotFound;
            }
            match self.state.lock().unwrap().receipts.get(handle) {
                Some(status) => Read::Ready(status.clone()),
                None => Read::NotFound,
            }
        }

        fn now(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    /// Wallet that applies each request to the mock ledger immediately.
    struct MockWallet {
        ledger: Arc<MockLedger>,
        counter: AtomicU32,
        reject: bool,
        revert_buys: bool,
    }

    #[async_trait]
    impl Wallet for MockWallet {
        fn address(&self) -> &str {
            ME
        }

        async fn submit_action(&self, request: &TxRequest) -> Result<String, WalletError> {
            if self.reject {
                return Err(WalletError::UserRejected);
            }
            let handle = format!("0x{:04}", self.counter.fetch_add(1, Ordering::SeqCst));
            let mut state = self.ledger.state.lock().unwrap();
            let status = match request.kind {
                ActionKind::Authorize => {
                    state.approvals += 1;
                    state.allowance = UNLIMITED_AUTHORIZATION;
                    ReceiptStatus::Success
                }
                ActionKind::Buy if self.revert_buys => ReceiptStatus::Reverted("Market ended".into()),
                ActionKind::Buy => {
                    state.buys += 1;
                    ReceiptStatus::Success
                }
                ActionKind::Claim => {
                    state.claims += 1;
                    ReceiptStatus::Success
                }
                ActionKind::CreateMarket => {
                    let id = state.markets.len() as u64;
                    let mut market = state.markets[0].clone();
                    market.id = id;
                    state.markets.push(market);
                    ReceiptStatus::Success
                }
                _ => ReceiptStatus::Success,
            };
            state.receipts.insert(handle.clone(), status);
            Ok(handle)
        }

        async fn sign_message(&self, _message: &str) -> Result<String, WalletError> {
            Ok("0xsig".into())
        }
    }

    fn setup(
        ledger: Arc<MockLedger>,
        reject: bool,
        revert_buys: bool,
    ) -> (Orchestrator, mpsc::UnboundedReceiver<MarketMetadata>) {
        let wallet = Arc::new(MockWallet {
            ledger: ledger.clone(),
            counter: AtomicU32::new(0),
            reject,
            revert_buys,
        });
        Orchestrator::new(
            wallet,
            ledger,
            OrchestratorConfig {
                market_contract: MARKET.into(),
                token_contract: TOKEN.into(),
                poll_interval: Duration::from_millis(1),
                registry: RegistryConfig::default(),
                authorize_unlimited: true,
            },
        )
    }

    #[tokio::test]
    async fn test_buy_inserts_authorization_when_allowance_low() {
        let ledger = MockLedger::new(1_000 * UNIT, 10 * UNIT);
        let (orch, _meta) = setup(ledger.clone(), false, false);

        let submission = orch.buy(0, Side::OptionA, 50 * UNIT).await.unwrap();
        let done = submission.wait().await.unwrap();
        assert_eq!(done.status, ActionStatus::Confirmed);
        assert_eq!(done.kind, ActionKind::Buy);

        let state = ledger.state.lock().unwrap();
        assert_eq!(state.approvals, 1);
        assert_eq!(state.buys, 1);
        drop(state);

        let history = orch.tracker().for_wallet(ME).await;
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|a| a.status == ActionStatus::Confirmed));
    }

    #[tokio::test]
    async fn test_buy_skips_authorization_when_allowed() {
        let ledger = MockLedger::new(1_000 * UNIT, UNLIMITED_AUTHORIZATION);
        let (orch, _meta) = setup(ledger.clone(), false, false);
        orch.buy(0, Side::OptionB, 50 * UNIT).await.unwrap().wait().await.unwrap();
        assert_eq!(ledger.state.lock().unwrap().approvals, 0);
    }

    #[tokio::test]
    async fn test_insufficient_balance_is_validation() {
        let ledger = MockLedger::new(10 * UNIT, UNLIMITED_AUTHORIZATION);
        let (orch, _meta) = setup(ledger, false, false);
        let err = orch.buy(0, Side::OptionA, 50 * UNIT).await.err().unwrap();
        assert_eq!(err, CoreError::InsufficientBalance { available: 10 * UNIT, requested: 50 * UNIT });
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_second_spend_rejected_while_first_in_flight() {
        let ledger = MockLedger::new(1_000 * UNIT, UNLIMITED_AUTHORIZATION);
        ledger.pending_polls.store(50, Ordering::SeqCst);
        let (orch, _meta) = setup(ledger.clone(), false, false);

        let first = orch.buy(0, Side::OptionA, 5 * UNIT).await.unwrap();
        let second = orch.buy(0, Side::OptionA, 5 * UNIT).await;
        assert_eq!(second.err(), Some(CoreError::ActionAlreadyInFlight(ME.to_string())));

        // non-spend actions are not gated
        ledger.now.store(6_000, Ordering::SeqCst);
        assert!(orch.resolve(0, Outcome::OptionA).await.is_ok());

        first.wait().await.unwrap();
        ledger.now.store(1_000, Ordering::SeqCst);
        assert!(orch.buy(0, Side::OptionA, 5 * UNIT).await.is_ok());
    }

    #[tokio::test]
    async fn test_confirmation_continues_after_caller_drops() {
        let ledger = MockLedger::new(1_000 * UNIT, UNLIMITED_AUTHORIZATION);
        ledger.pending_polls.store(3, Ordering::SeqCst);
        let (orch, _meta) = setup(ledger, false, false);
        let refresh = orch.refresh_signal();

        let id = {
            let submission = orch.buy(0, Side::OptionA, 5 * UNIT).await.unwrap();
            submission.action.id
        };
        refresh.notified().await;

        let action = orch.tracker().get(&id).await.unwrap();
        assert_eq!(action.status, ActionStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_revert_is_terminal_failure() {
        let ledger = MockLedger::new(1_000 * UNIT, UNLIMITED_AUTHORIZATION);
        let (orch, _meta) = setup(ledger, false, true);
        let submission = orch.buy(0, Side::OptionA, 5 * UNIT).await.unwrap();
        let id = submission.action.id;
        assert_eq!(
            submission.wait().await.err(),
            Some(CoreError::LedgerRejected("Market ended".into()))
        );
        let failed = orch.tracker().get(&id).await.unwrap();
        assert_eq!(failed.status, ActionStatus::Failed);
        assert_eq!(failed.error_kind, Some(ErrorKind::LedgerRejection));
    }

    #[tokio::test]
    async fn test_user_rejection_leaves_no_handle_and_frees_lock() {
        let ledger = MockLedger::new(1_000 * UNIT, UNLIMITED_AUTHORIZATION);
        let (orch, _meta) = setup(ledger, true, false);
        assert_eq!(orch.buy(0, Side::OptionA, 5 * UNIT).await.err(), Some(CoreError::UserRejected));

        let history = orch.tracker().for_wallet(ME).await;
        assert_eq!(history[0].status, ActionStatus::Failed);
        assert!(history[0].handle.is_none());
        // lock released: next attempt fails the same way, not with in-flight
        assert_eq!(orch.buy(0, Side::OptionA, 5 * UNIT).await.err(), Some(CoreError::UserRejected));
    }

    #[tokio::test]
    async fn test_expired_market_rejected_before_submission() {
        let ledger = MockLedger::new(1_000 * UNIT, UNLIMITED_AUTHORIZATION);
        ledger.now.store(5_000, Ordering::SeqCst);
        let (orch, _meta) = setup(ledger.clone(), false, false);
        assert_eq!(
            orch.buy(0, Side::OptionA, 5 * UNIT).await.err(),
            Some(CoreError::MarketTradingEnded(0))
        );
        assert_eq!(ledger.state.lock().unwrap().buys, 0);
    }

    #[tokio::test]
    async fn test_allowance_revoked_after_authorization_is_race() {
        let ledger = Arc::new(MockLedger {
            revoke_after_reads: Some(1),
            ..Arc::try_unwrap(MockLedger::new(1_000 * UNIT, 0)).ok().unwrap()
        });
        let (orch, _meta) = setup(ledger, false, false);
        let err = orch.buy(0, Side::OptionA, 50 * UNIT).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ConcurrencyRace);
        assert!(err.user_message().starts_with("Conditions changed, please retry"));
    }

    #[tokio::test]
    async fn test_resolve_time_gate() {
        let ledger = MockLedger::new(0, 0);
        let (orch, _meta) = setup(ledger.clone(), false, false);
        assert_eq!(orch.cancel(0).await.err(), Some(CoreError::MarketNotEnded(0)));
        ledger.now.store(5_000, Ordering::SeqCst);
        let done = orch.cancel(0).await.unwrap().wait().await.unwrap();
        assert_eq!(done.kind, ActionKind::Cancel);
    }

    #[tokio::test]
    async fn test_claim_requires_resolution() {
        let ledger = MockLedger::new(0, 0);
        let (orch, _meta) = setup(ledger, false, false);
        assert_eq!(orch.claim(0).await.err(), Some(CoreError::MarketNotResolved(0)));
        assert_eq!(orch.claim(9).await.err(), Some(CoreError::MarketNotFound(9)));
    }

    #[tokio::test]
    async fn test_claim_without_winning_shares_submits_nothing() {
        let ledger = MockLedger::new(0, 0);
        {
            let mut state = ledger.state.lock().unwrap();
            state.markets[0].resolved = true;
            state.markets[0].outcome = Outcome::OptionA;
            state.shares = RemoteShares { shares_a: 0, shares_b: 7 };
        }
        let (orch, _meta) = setup(ledger.clone(), false, false);

        assert_eq!(orch.claim(0).await.err(), Some(CoreError::NoWinningsToClaim(0)));
        assert_eq!(ledger.state.lock().unwrap().claims, 0);
        assert!(orch.tracker().for_wallet(ME).await.is_empty());

        // losing-side shares still refund once the market is cancelled
        ledger.state.lock().unwrap().markets[0].outcome = Outcome::Cancelled;
        let done = orch.claim(0).await.unwrap().wait().await.unwrap();
        assert_eq!(done.kind, ActionKind::Claim);
        assert_eq!(ledger.state.lock().unwrap().claims, 1);
    }

    #[tokio::test]
    async fn test_create_market_emits_metadata() {
        let ledger = MockLedger::new(0, 0);
        let (orch, mut meta) = setup(ledger, false, false);
        let refs = MetadataRefs {
            category_ref: Some("weather".into()),
            ..MetadataRefs::default()
        };
        orch.create_market("Snow?", "Yes", "No", 7_200, refs)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        let emitted = meta.recv().await.unwrap();
        assert_eq!(emitted.market_id, 1);
        assert_eq!(emitted.contract_address, MARKET);
        assert_eq!(emitted.category_ref.as_deref(), Some("weather"));
    }

    #[tokio::test]
    async fn test_create_market_duration_checked_locally() {
        let (orch, _meta) = setup(MockLedger::new(0, 0), false, false);
        let res = orch.create_market("Q", "Yes", "No", 10, MetadataRefs::default()).await;
        assert!(matches!(res.err(), Some(CoreError::InvalidDuration { .. })));
        assert!(orch.tracker().for_wallet(ME).await.is_empty());
    }
}
