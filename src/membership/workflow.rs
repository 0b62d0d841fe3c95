// Membership settlement workflow - join and leave state machines
//
// A workflow value lives for exactly one attempt; every invocation starts at
// Idle and nothing persists between attempts. Ledger calls and store
// mutations are injected so the sequencing logic runs identically against a
// live chain or recording fakes. The abort handle is consulted before every
// suspend point up to settlement submission; once the settlement transaction
// is on the wire, aborting no longer changes the outcome.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::ChainConfig;
use crate::core::{current_time_millis, Address, TxHash, Usdc};
use crate::error::AppError;
use crate::onchain::ledger::{
    MarketplaceContract, PassContract, ReceiptWaiter, RegistrarContract, TokenContract,
};
use crate::onchain::resolver::{normalize_pass_expiry, resolve_membership_course_id};
use crate::store::database::DataStore;
use crate::store::models::{Group, Membership};

/// Optional ledger clients. A deployment can run with none of them, in which
/// case free communities work end to end and paid flows fail with a
/// configuration error.
#[derive(Clone, Default)]
pub struct LedgerHandles {
    pub token: Option<Arc<dyn TokenContract>>,
    pub pass: Option<Arc<dyn PassContract>>,
    pub marketplace: Option<Arc<dyn MarketplaceContract>>,
    pub registrar: Option<Arc<dyn RegistrarContract>>,
    pub receipts: Option<Arc<dyn ReceiptWaiter>>,
}

/// Cooperative cancellation for an in-flight join attempt.
#[derive(Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    Idle,
    ResolvingMembership,
    FreeJoin,
    PaidJoin,
    Recording,
    Done,
}

/// Why a join attempt stopped. Each variant maps to a distinct user-facing
/// message; `PaymentUnconfirmed` is the one class where money moved but pass
/// possession could not be confirmed, and it is never retried automatically.
#[derive(Debug)]
pub enum JoinFailure {
    Precondition(String),
    NotConfigured(String),
    InsufficientBalance { required: Usdc, available: Usdc },
    PaymentFailed(String),
    PaymentUnconfirmed { tx_hash: TxHash },
    Aborted,
    Recording(String),
}

impl fmt::Display for JoinFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinFailure::Precondition(msg) => write!(f, "Cannot join yet: {}", msg),
            JoinFailure::NotConfigured(msg) => {
                write!(f, "Payments are not configured: {}", msg)
            }
            JoinFailure::InsufficientBalance { required, available } => write!(
                f,
                "Insufficient balance: {} USDC required, {} USDC available",
                required, available
            ),
            JoinFailure::PaymentFailed(msg) => write!(f, "Payment failed: {}", msg),
            JoinFailure::PaymentUnconfirmed { tx_hash } => write!(
                f,
                "Payment was sent (tx {}) but membership could not be confirmed. \
                 Do not retry; contact support or refresh.",
                tx_hash
            ),
            JoinFailure::Aborted => write!(f, "Join cancelled"),
            JoinFailure::Recording(msg) => write!(f, "Failed to record membership: {}", msg),
        }
    }
}

impl From<JoinFailure> for AppError {
    fn from(failure: JoinFailure) -> Self {
        match failure {
            JoinFailure::Precondition(_) => AppError::Validation(failure.to_string()),
            JoinFailure::NotConfigured(_) => AppError::ConfigurationError(failure.to_string()),
            JoinFailure::InsufficientBalance { .. } | JoinFailure::PaymentFailed(_) => {
                AppError::SettlementError(failure.to_string())
            }
            JoinFailure::PaymentUnconfirmed { .. } => {
                AppError::SettlementUnconfirmed(failure.to_string())
            }
            JoinFailure::Aborted => AppError::BadRequest(failure.to_string()),
            JoinFailure::Recording(_) => AppError::Internal(failure.to_string()),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct JoinOutcome {
    pub membership: Membership,
    pub tx_hash: Option<TxHash>,
    pub amount_paid: Option<Usdc>,
    pub skipped_payment: bool,
}

/// What the leave dialog must disclose before the member confirms.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LeaveDisclosure {
    pub requires_payment: bool,
    pub holds_unexpired_pass: bool,
    pub pass_expires_at: Option<i64>,
    pub rejoin_without_payment: bool,
}

pub struct SettlementWorkflow<'a> {
    store: &'a DataStore,
    ledger: &'a LedgerHandles,
    chain: &'a ChainConfig,
}

impl<'a> SettlementWorkflow<'a> {
    pub fn new(store: &'a DataStore, ledger: &'a LedgerHandles, chain: &'a ChainConfig) -> Self {
        SettlementWorkflow { store, ledger, chain }
    }

    /// Run one join attempt to completion.
    pub async fn join(
        &self,
        group_id: i64,
        wallet: &Address,
        abort: &AbortHandle,
    ) -> Result<JoinOutcome, JoinFailure> {
        if abort.is_aborted() {
            return Err(JoinFailure::Aborted);
        }

        let group = self
            .store
            .get_group(group_id)
            .await
            .map_err(|e| JoinFailure::Precondition(e.to_string()))?
            .ok_or_else(|| JoinFailure::Precondition("group not found".to_string()))?;

        let mut state = JoinState::ResolvingMembership;
        info!(group_id, wallet = %wallet, state = ?state, "join attempt started");

        if !group.requires_payment() {
            state = JoinState::FreeJoin;
            info!(group_id, state = ?state, "free community, no settlement");
            return self.record(group_id, wallet, None, false, None, None).await;
        }

        state = JoinState::PaidJoin;
        info!(group_id, state = ?state, price = group.price, "paid community");

        let course_id = resolve_membership_course_id(
            group.subscription_id.as_deref(),
            &group.tags,
        )
        .ok_or_else(|| {
            JoinFailure::NotConfigured("no membership course id for this group".to_string())
        })?;

        // A wallet already holding an active pass is never charged twice.
        let mut skip_payment = false;
        let mut pass_expiry: Option<i64> = None;
        let mut chain_answered = false;

        if let Some(pass) = &self.ledger.pass {
            match futures::try_join!(
                pass.is_pass_active(course_id, wallet),
                pass.get_pass_state(course_id, wallet),
            ) {
                Ok((active, pass_state)) => {
                    chain_answered = true;
                    if active {
                        skip_payment = true;
                        pass_expiry = normalize_pass_expiry(pass_state.expires_at);
                    }
                }
                Err(err) => {
                    warn!(group_id, course_id, %err, "pass state read failed");
                }
            }
        }

        // Cached fallback only covers an unavailable read, never a definitive
        // "no active pass" answer from the chain.
        if !skip_payment && !chain_answered {
            let cached = self
                .store
                .get_cached_pass_expiry(group_id, wallet)
                .await
                .unwrap_or(None);
            if let Some(expiry) = cached {
                if expiry > current_time_millis() {
                    skip_payment = true;
                    pass_expiry = Some(expiry);
                    info!(group_id, expiry, "using cached pass expiry");
                }
            }
        }

        if skip_payment {
            return self
                .record(group_id, wallet, None, true, pass_expiry, None)
                .await;
        }

        if abort.is_aborted() {
            return Err(JoinFailure::Aborted);
        }

        let token = self.ledger.token.as_ref().ok_or_else(|| {
            JoinFailure::NotConfigured("settlement token client is missing".to_string())
        })?;
        let marketplace = self.ledger.marketplace.as_ref().ok_or_else(|| {
            JoinFailure::NotConfigured("marketplace client is missing".to_string())
        })?;
        let receipts = self.ledger.receipts.as_ref().ok_or_else(|| {
            JoinFailure::NotConfigured("receipt waiter is missing".to_string())
        })?;
        let spender = self.chain.marketplace_address.as_ref().ok_or_else(|| {
            JoinFailure::NotConfigured("marketplace contract address is not set".to_string())
        })?;

        let required = Usdc::from_decimal(group.price);

        let available = token
            .balance_of(wallet)
            .await
            .map_err(|e| JoinFailure::PaymentFailed(e.to_string()))?;
        if available < required {
            return Err(JoinFailure::InsufficientBalance { required, available });
        }

        if abort.is_aborted() {
            return Err(JoinFailure::Aborted);
        }

        // One maximum approval covers every later join and purchase, so the
        // wallet is only prompted once.
        let allowance = token
            .allowance(wallet, spender)
            .await
            .map_err(|e| JoinFailure::PaymentFailed(e.to_string()))?;
        if allowance < required {
            let approval_tx = token
                .approve(spender, Usdc::MAX)
                .await
                .map_err(|e| JoinFailure::PaymentFailed(e.to_string()))?;
            receipts
                .wait_for_receipt(&approval_tx)
                .await
                .map_err(|e| JoinFailure::PaymentFailed(e.to_string()))?;
        }

        if abort.is_aborted() {
            return Err(JoinFailure::Aborted);
        }

        // Past this point aborting cannot undo anything.
        let tx_hash = marketplace
            .purchase_primary(course_id, required)
            .await
            .map_err(|e| JoinFailure::PaymentFailed(e.to_string()))?;

        if let Err(err) = receipts.wait_for_receipt(&tx_hash).await {
            error!(group_id, tx = %tx_hash, %err, "settlement receipt never confirmed");
            return Err(JoinFailure::PaymentUnconfirmed { tx_hash });
        }

        // Possession check after a marketplace settlement. Failure here means
        // money moved but the pass did not arrive; report, never roll back.
        if let Some(pass) = &self.ledger.pass {
            match pass.is_pass_active(course_id, wallet).await {
                Ok(true) => {
                    if let Ok(pass_state) = pass.get_pass_state(course_id, wallet).await {
                        pass_expiry = normalize_pass_expiry(pass_state.expires_at);
                    }
                }
                Ok(false) => {
                    error!(group_id, tx = %tx_hash, "payment confirmed but pass not held");
                    return Err(JoinFailure::PaymentUnconfirmed { tx_hash });
                }
                Err(err) => {
                    error!(group_id, tx = %tx_hash, %err, "post-payment pass check failed");
                    return Err(JoinFailure::PaymentUnconfirmed { tx_hash });
                }
            }
        }

        self.record(
            group_id,
            wallet,
            Some(tx_hash),
            true,
            pass_expiry,
            Some(required),
        )
        .await
    }

    async fn record(
        &self,
        group_id: i64,
        wallet: &Address,
        tx_hash: Option<TxHash>,
        has_active_pass: bool,
        pass_expiry: Option<i64>,
        amount_paid: Option<Usdc>,
    ) -> Result<JoinOutcome, JoinFailure> {
        let state = JoinState::Recording;
        info!(group_id, state = ?state, paid = amount_paid.is_some(), "recording membership");

        let membership = self
            .store
            .join_group(group_id, wallet, tx_hash.as_ref(), has_active_pass, pass_expiry)
            .await
            .map_err(|e| {
                if let Some(tx) = &tx_hash {
                    error!(group_id, tx = %tx, %e, "payment settled but recording failed");
                }
                JoinFailure::Recording(e.to_string())
            })?;

        info!(group_id, state = ?JoinState::Done, "join complete");
        Ok(JoinOutcome {
            membership,
            tx_hash,
            amount_paid,
            skipped_payment: amount_paid.is_none() && has_active_pass,
        })
    }

    /// Leave a community, refreshing the cached pass expiry from the chain
    /// when possible so a later rejoin sees the best-known value.
    pub async fn leave(&self, group_id: i64, wallet: &Address) -> Result<(), AppError> {
        let group = self.store.require_group(group_id).await?;

        let mut expiry = self
            .store
            .get_membership(group_id, wallet)
            .await?
            .and_then(|m| m.pass_expires_at);

        if group.requires_payment() {
            if let Some(fresh) = self.read_pass_expiry(&group, wallet).await {
                expiry = Some(fresh);
            }
        }

        self.store.leave_group(group_id, wallet, expiry).await
    }

    /// Facts for the leave confirmation dialog.
    pub async fn leave_disclosure(
        &self,
        group_id: i64,
        wallet: &Address,
    ) -> Result<LeaveDisclosure, AppError> {
        let group = self.store.require_group(group_id).await?;

        if !group.requires_payment() {
            return Ok(LeaveDisclosure {
                requires_payment: false,
                holds_unexpired_pass: false,
                pass_expires_at: None,
                rejoin_without_payment: true,
            });
        }

        let mut expiry = self.read_pass_expiry(&group, wallet).await;
        if expiry.is_none() {
            expiry = self
                .store
                .get_membership(group_id, wallet)
                .await?
                .and_then(|m| m.pass_expires_at);
        }

        let holds = expiry.map(|e| e > current_time_millis()).unwrap_or(false);
        Ok(LeaveDisclosure {
            requires_payment: true,
            holds_unexpired_pass: holds,
            pass_expires_at: expiry,
            rejoin_without_payment: holds,
        })
    }

    /// Re-register the payout split for a group's course with the registrar.
    /// Called after a settings update changes price or collaborators.
    pub async fn register_course_split(
        &self,
        group: &Group,
        recipients: &[Address],
        shares_bps: &[u32],
    ) -> Result<Address, AppError> {
        let registrar = self.ledger.registrar.as_ref().ok_or_else(|| {
            AppError::ConfigurationError("registrar client is missing".to_string())
        })?;

        let course_id = resolve_membership_course_id(
            group.subscription_id.as_deref(),
            &group.tags,
        )
        .ok_or_else(|| {
            AppError::ConfigurationError("no membership course id for this group".to_string())
        })?;

        let splitter = registrar
            .register_course(
                course_id,
                Usdc::from_decimal(group.price),
                recipients,
                shares_bps,
                self.chain.default_membership_duration_secs,
                self.chain.default_transfer_cooldown_secs,
            )
            .await
            .map_err(|e| AppError::SettlementError(e.to_string()))?;

        info!(group_id = group.id, splitter = %splitter, "course split registered");
        Ok(splitter)
    }

    async fn read_pass_expiry(&self, group: &Group, wallet: &Address) -> Option<i64> {
        let pass = self.ledger.pass.as_ref()?;
        let course_id =
            resolve_membership_course_id(group.subscription_id.as_deref(), &group.tags)?;

        match pass.get_pass_state(course_id, wallet).await {
            Ok(pass_state) => normalize_pass_expiry(pass_state.expires_at),
            Err(err) => {
                warn!(group_id = group.id, %err, "pass expiry read failed");
                None
            }
        }
    }
}
