// Ledger client surface - typed async traits over the settlement contracts
//
// The chain itself is an external collaborator: these traits describe the
// exact function-call surface the application consumes (ERC-20 settlement
// token, ERC-1155 membership pass, marketplace, registrar) and nothing else.
// Production wiring supplies RPC-backed implementations; tests supply
// recording fakes. All writes return a transaction hash that must be pushed
// through `ReceiptWaiter::wait_for_receipt` before being treated as settled.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Address, TxHash, Usdc};

/// Course configuration as registered on the membership pass contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseData {
    pub price_usdc: Usdc,
    pub splitter: Address,
    pub creator: Address,
    pub duration_secs: u64,
    pub transfer_cooldown_secs: u64,
}

/// Per-(course, wallet) pass state. Timestamps are raw contract values and may
/// be second- or millisecond-based; callers normalize via
/// `resolver::normalize_pass_expiry`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PassState {
    pub expires_at: u64,
    pub cooldown_ends_at: u64,
}

/// Result of the contract's transfer-eligibility check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransferCheck {
    pub eligible: bool,
    pub available_at: u64,
    pub expires_at: u64,
}

/// A live marketplace listing, sourced from the ledger and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub seller: Address,
    pub price_usdc: Usdc,
    pub listed_at: u64,
    pub expires_at: u64,
    pub active: bool,
}

/// Block confirmation for a submitted transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Confirmation {
    pub tx_hash: TxHash,
    pub block_number: u64,
}

/// ERC-20 settlement token (USDC) reads and writes.
#[async_trait]
pub trait TokenContract: Send + Sync {
    async fn balance_of(&self, owner: &Address) -> Result<Usdc>;

    async fn allowance(&self, owner: &Address, spender: &Address) -> Result<Usdc>;

    async fn approve(&self, spender: &Address, amount: Usdc) -> Result<TxHash>;

    async fn transfer(&self, to: &Address, amount: Usdc) -> Result<TxHash>;
}

/// ERC-1155 membership pass contract reads plus operator approval.
#[async_trait]
pub trait PassContract: Send + Sync {
    async fn get_course(&self, course_id: u128) -> Result<CourseData>;

    async fn get_pass_state(&self, course_id: u128, account: &Address) -> Result<PassState>;

    async fn is_pass_active(&self, course_id: u128, account: &Address) -> Result<bool>;

    async fn can_transfer(&self, course_id: u128, account: &Address) -> Result<TransferCheck>;

    async fn is_approved_for_all(&self, owner: &Address, operator: &Address) -> Result<bool>;

    async fn set_approval_for_all(&self, operator: &Address, approved: bool) -> Result<TxHash>;
}

/// Marketplace contract: primary mints, secondary listings, renewals.
#[async_trait]
pub trait MarketplaceContract: Send + Sync {
    async fn purchase_primary(&self, course_id: u128, max_price: Usdc) -> Result<TxHash>;

    async fn create_listing(
        &self,
        course_id: u128,
        price_usdc: Usdc,
        duration_secs: u64,
    ) -> Result<TxHash>;

    async fn cancel_listing(&self, course_id: u128) -> Result<TxHash>;

    async fn buy_listing(
        &self,
        course_id: u128,
        seller: &Address,
        max_price: Usdc,
    ) -> Result<TxHash>;

    async fn renew(&self, course_id: u128, max_price: Usdc) -> Result<TxHash>;

    async fn get_active_listings(&self, course_id: u128) -> Result<Vec<Listing>>;
}

/// Registrar contract that provisions a course and its payout splitter.
#[async_trait]
pub trait RegistrarContract: Send + Sync {
    /// Register (or re-register) a course with its primary price, payout
    /// recipients/shares in basis points, membership duration and transfer
    /// cooldown. Returns the splitter address the contract deployed.
    async fn register_course(
        &self,
        course_id: u128,
        price_usdc: Usdc,
        recipients: &[Address],
        shares_bps: &[u32],
        duration_secs: u64,
        transfer_cooldown_secs: u64,
    ) -> Result<Address>;
}

/// Blocks until the chain confirms a submitted transaction. An unconfirmed
/// transaction is never treated as success.
#[async_trait]
pub trait ReceiptWaiter: Send + Sync {
    async fn wait_for_receipt(&self, tx_hash: &TxHash) -> Result<Confirmation>;
}
