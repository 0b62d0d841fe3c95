// Marketplace flows - primary purchase, secondary listings, renewal
//
// Everything here is a thin sequencing layer over the ledger clients: reads
// are combined concurrently for the feed, writes follow the same
// balance/allowance/receipt discipline as the join workflow.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::config::ChainConfig;
use crate::core::{Address, TxHash, Usdc};
use crate::error::{AppError, AppResult};
use crate::membership::workflow::LedgerHandles;
use crate::onchain::ledger::{
    CourseData, Listing, MarketplaceContract, PassContract, ReceiptWaiter, TokenContract,
    TransferCheck,
};
use crate::onchain::resolver::normalize_pass_expiry;

/// Allowed secondary-listing durations: 1, 3 or 7 days.
pub const LISTING_DURATIONS_SECS: [u64; 3] = [86_400, 259_200, 604_800];
pub const DEFAULT_LISTING_DURATION_SECS: u64 = 259_200;

/// Course state as shown in the marketplace feed, assembled from concurrent
/// ledger reads and never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct CourseOverview {
    pub course: CourseData,
    pub listings: Vec<Listing>,
    pub floor_price: Option<Usdc>,
    pub viewer: Option<ViewerPassStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewerPassStatus {
    pub pass_active: bool,
    pub pass_expires_at: Option<i64>,
    pub transfer_eligible: bool,
    pub transfer_available_at: u64,
}

pub struct MarketplaceService<'a> {
    ledger: &'a LedgerHandles,
    chain: &'a ChainConfig,
}

impl<'a> MarketplaceService<'a> {
    pub fn new(ledger: &'a LedgerHandles, chain: &'a ChainConfig) -> Self {
        MarketplaceService { ledger, chain }
    }

    /// Course data, live listings and (when a viewer is given) that wallet's
    /// pass and transfer state, read concurrently.
    pub async fn course_overview(
        &self,
        course_id: u128,
        viewer: Option<&Address>,
    ) -> AppResult<CourseOverview> {
        let pass = self.pass()?;
        let marketplace = self.marketplace()?;

        let (course, listings) = futures::try_join!(
            pass.get_course(course_id),
            marketplace.get_active_listings(course_id),
        )
        .map_err(|e| AppError::SettlementError(e.to_string()))?;

        let floor_price = listings
            .iter()
            .filter(|l| l.active)
            .map(|l| l.price_usdc)
            .min();

        let viewer_status = match viewer {
            Some(wallet) => {
                let (active, pass_state, transfer): (bool, _, TransferCheck) = futures::try_join!(
                    pass.is_pass_active(course_id, wallet),
                    pass.get_pass_state(course_id, wallet),
                    pass.can_transfer(course_id, wallet),
                )
                .map_err(|e| AppError::SettlementError(e.to_string()))?;

                Some(ViewerPassStatus {
                    pass_active: active,
                    pass_expires_at: normalize_pass_expiry(pass_state.expires_at),
                    transfer_eligible: transfer.eligible,
                    transfer_available_at: transfer.available_at,
                })
            }
            None => None,
        };

        Ok(CourseOverview { course, listings, floor_price, viewer: viewer_status })
    }

    /// Mint a pass at the primary price.
    pub async fn purchase_primary(&self, course_id: u128, buyer: &Address) -> AppResult<TxHash> {
        let pass = self.pass()?;
        let marketplace = self.marketplace()?;
        let receipts = self.receipts()?;
        let spender = self.spender()?;

        let course = pass
            .get_course(course_id)
            .await
            .map_err(|e| AppError::SettlementError(e.to_string()))?;

        self.check_balance(buyer, course.price_usdc).await?;
        self.ensure_allowance(buyer, &spender, course.price_usdc).await?;

        let tx_hash = marketplace
            .purchase_primary(course_id, course.price_usdc)
            .await
            .map_err(|e| AppError::SettlementError(e.to_string()))?;
        receipts
            .wait_for_receipt(&tx_hash)
            .await
            .map_err(|e| AppError::SettlementUnconfirmed(format!("tx {}: {}", tx_hash, e)))?;

        info!(course_id, tx = %tx_hash, "primary purchase settled");
        Ok(tx_hash)
    }

    /// List the seller's pass for sale. Requires an eligible (cooled-down)
    /// pass and a one-time operator approval for the marketplace.
    pub async fn create_listing(
        &self,
        course_id: u128,
        seller: &Address,
        price: Usdc,
        duration_secs: Option<u64>,
    ) -> AppResult<TxHash> {
        let pass = self.pass()?;
        let marketplace = self.marketplace()?;
        let receipts = self.receipts()?;
        let spender = self.spender()?;

        if price == Usdc::ZERO {
            return Err(AppError::Validation("Listing price must be above zero".to_string()));
        }

        let duration = duration_secs.unwrap_or(DEFAULT_LISTING_DURATION_SECS);
        if !LISTING_DURATIONS_SECS.contains(&duration) {
            return Err(AppError::Validation(
                "Listing duration must be 1, 3 or 7 days".to_string(),
            ));
        }

        let transfer = pass
            .can_transfer(course_id, seller)
            .await
            .map_err(|e| AppError::SettlementError(e.to_string()))?;
        if !transfer.eligible {
            return Err(AppError::Validation(
                "This pass is still in its transfer cooldown".to_string(),
            ));
        }

        let approved = pass
            .is_approved_for_all(seller, &spender)
            .await
            .map_err(|e| AppError::SettlementError(e.to_string()))?;
        if !approved {
            let approval_tx = pass
                .set_approval_for_all(&spender, true)
                .await
                .map_err(|e| AppError::SettlementError(e.to_string()))?;
            receipts
                .wait_for_receipt(&approval_tx)
                .await
                .map_err(|e| AppError::SettlementError(e.to_string()))?;
        }

        let tx_hash = marketplace
            .create_listing(course_id, price, duration)
            .await
            .map_err(|e| AppError::SettlementError(e.to_string()))?;
        receipts
            .wait_for_receipt(&tx_hash)
            .await
            .map_err(|e| AppError::SettlementUnconfirmed(format!("tx {}: {}", tx_hash, e)))?;

        info!(course_id, price = %price, duration, tx = %tx_hash, "listing created");
        Ok(tx_hash)
    }

    pub async fn cancel_listing(&self, course_id: u128) -> AppResult<TxHash> {
        let marketplace = self.marketplace()?;
        let receipts = self.receipts()?;

        let tx_hash = marketplace
            .cancel_listing(course_id)
            .await
            .map_err(|e| AppError::SettlementError(e.to_string()))?;
        receipts
            .wait_for_receipt(&tx_hash)
            .await
            .map_err(|e| AppError::SettlementUnconfirmed(format!("tx {}: {}", tx_hash, e)))?;

        Ok(tx_hash)
    }

    /// Buy the cheapest active listing.
    pub async fn buy_floor(&self, course_id: u128, buyer: &Address) -> AppResult<TxHash> {
        let marketplace = self.marketplace()?;
        let receipts = self.receipts()?;
        let spender = self.spender()?;

        let listings = marketplace
            .get_active_listings(course_id)
            .await
            .map_err(|e| AppError::SettlementError(e.to_string()))?;

        let floor = listings
            .iter()
            .filter(|l| l.active)
            .min_by_key(|l| l.price_usdc)
            .ok_or_else(|| AppError::NotFound("No active listings".to_string()))?
            .clone();

        self.check_balance(buyer, floor.price_usdc).await?;
        self.ensure_allowance(buyer, &spender, floor.price_usdc).await?;

        let tx_hash = marketplace
            .buy_listing(course_id, &floor.seller, floor.price_usdc)
            .await
            .map_err(|e| AppError::SettlementError(e.to_string()))?;
        receipts
            .wait_for_receipt(&tx_hash)
            .await
            .map_err(|e| AppError::SettlementUnconfirmed(format!("tx {}: {}", tx_hash, e)))?;

        info!(course_id, seller = %floor.seller, price = %floor.price_usdc, tx = %tx_hash, "listing bought");
        Ok(tx_hash)
    }

    /// Extend the caller's pass at the primary price.
    pub async fn renew(&self, course_id: u128, wallet: &Address) -> AppResult<TxHash> {
        let pass = self.pass()?;
        let marketplace = self.marketplace()?;
        let receipts = self.receipts()?;
        let spender = self.spender()?;

        let course = pass
            .get_course(course_id)
            .await
            .map_err(|e| AppError::SettlementError(e.to_string()))?;

        self.check_balance(wallet, course.price_usdc).await?;
        self.ensure_allowance(wallet, &spender, course.price_usdc).await?;

        let tx_hash = marketplace
            .renew(course_id, course.price_usdc)
            .await
            .map_err(|e| AppError::SettlementError(e.to_string()))?;
        receipts
            .wait_for_receipt(&tx_hash)
            .await
            .map_err(|e| AppError::SettlementUnconfirmed(format!("tx {}: {}", tx_hash, e)))?;

        info!(course_id, tx = %tx_hash, "pass renewed");
        Ok(tx_hash)
    }

    async fn check_balance(&self, wallet: &Address, required: Usdc) -> AppResult<()> {
        let token = self.token()?;
        let available = token
            .balance_of(wallet)
            .await
            .map_err(|e| AppError::SettlementError(e.to_string()))?;
        if available < required {
            return Err(AppError::SettlementError(format!(
                "Insufficient balance: {} USDC required, {} USDC available",
                required, available
            )));
        }
        Ok(())
    }

    async fn ensure_allowance(
        &self,
        wallet: &Address,
        spender: &Address,
        required: Usdc,
    ) -> AppResult<()> {
        let token = self.token()?;
        let receipts = self.receipts()?;

        let allowance = token
            .allowance(wallet, spender)
            .await
            .map_err(|e| AppError::SettlementError(e.to_string()))?;
        if allowance < required {
            let tx = token
                .approve(spender, Usdc::MAX)
                .await
                .map_err(|e| AppError::SettlementError(e.to_string()))?;
            receipts
                .wait_for_receipt(&tx)
                .await
                .map_err(|e| AppError::SettlementError(e.to_string()))?;
        }
        Ok(())
    }

    fn token(&self) -> AppResult<&Arc<dyn TokenContract>> {
        self.ledger.token.as_ref().ok_or_else(|| {
            AppError::ConfigurationError("settlement token client is missing".to_string())
        })
    }

    fn pass(&self) -> AppResult<&Arc<dyn PassContract>> {
        self.ledger.pass.as_ref().ok_or_else(|| {
            AppError::ConfigurationError("membership pass client is missing".to_string())
        })
    }

    fn marketplace(&self) -> AppResult<&Arc<dyn MarketplaceContract>> {
        self.ledger.marketplace.as_ref().ok_or_else(|| {
            AppError::ConfigurationError("marketplace client is missing".to_string())
        })
    }

    fn receipts(&self) -> AppResult<&Arc<dyn ReceiptWaiter>> {
        self.ledger.receipts.as_ref().ok_or_else(|| {
            AppError::ConfigurationError("receipt waiter is missing".to_string())
        })
    }

    fn spender(&self) -> AppResult<Address> {
        self.chain
            .marketplace_address
            .clone()
            .ok_or_else(|| {
                AppError::ConfigurationError(
                    "marketplace contract address is not set".to_string(),
                )
            })
    }
}
