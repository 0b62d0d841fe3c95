// Join workflow and marketplace flows driven against recording ledger fakes

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use skillvesta::config::ChainConfig;
use skillvesta::core::{current_time_millis, Address, TxHash, Usdc};
use skillvesta::membership::{
    AbortHandle, JoinFailure, LedgerHandles, MarketplaceService, SettlementWorkflow,
};
use skillvesta::onchain::ledger::{
    Confirmation, CourseData, Listing, MarketplaceContract, PassContract, PassState,
    ReceiptWaiter, RegistrarContract, TokenContract, TransferCheck,
};
use skillvesta::store::database::DataStore;
use skillvesta::store::models::{BillingCadence, Group, GroupSettingsUpdate};

fn addr(n: u8) -> Address {
    Address::parse(&format!("0x{:040x}", n)).unwrap()
}

/// One fake standing in for every contract, recording each call by name.
struct FakeChain {
    calls: Mutex<Vec<String>>,
    balance: Usdc,
    allowance: Usdc,
    pass_active: bool,
    pass_expires_at: u64,
    fail_pass_reads: bool,
    withhold_pass_after_purchase: bool,
    transfer_eligible: bool,
    approved_for_all: bool,
    listings: Vec<Listing>,
    purchased: AtomicBool,
}

impl Default for FakeChain {
    fn default() -> Self {
        FakeChain {
            calls: Mutex::new(Vec::new()),
            balance: Usdc::from_units(1_000_000_000),
            allowance: Usdc::ZERO,
            pass_active: false,
            pass_expires_at: 0,
            fail_pass_reads: false,
            withhold_pass_after_purchase: false,
            transfer_eligible: true,
            approved_for_all: false,
            listings: Vec::new(),
            purchased: AtomicBool::new(false),
        }
    }
}

impl FakeChain {
    fn log(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn called(&self, name: &str) -> bool {
        self.calls().iter().any(|c| c == name)
    }
}

#[async_trait]
impl TokenContract for FakeChain {
    async fn balance_of(&self, _owner: &Address) -> Result<Usdc> {
        self.log("balance_of");
        Ok(self.balance)
    }

    async fn allowance(&self, _owner: &Address, _spender: &Address) -> Result<Usdc> {
        self.log("allowance");
        Ok(self.allowance)
    }

    async fn approve(&self, _spender: &Address, _amount: Usdc) -> Result<TxHash> {
        self.log("approve");
        Ok(TxHash("0xa9".to_string()))
    }

    async fn transfer(&self, _to: &Address, _amount: Usdc) -> Result<TxHash> {
        self.log("transfer");
        Ok(TxHash("0x7f".to_string()))
    }
}

#[async_trait]
impl PassContract for FakeChain {
    async fn get_course(&self, _course_id: u128) -> Result<CourseData> {
        self.log("get_course");
        Ok(CourseData {
            price_usdc: Usdc::from_decimal(49.0),
            splitter: addr(9),
            creator: addr(1),
            duration_secs: 30 * 24 * 3600,
            transfer_cooldown_secs: 7 * 24 * 3600,
        })
    }

    async fn get_pass_state(&self, _course_id: u128, _account: &Address) -> Result<PassState> {
        self.log("get_pass_state");
        if self.fail_pass_reads {
            anyhow::bail!("rpc unavailable");
        }
        Ok(PassState {
            expires_at: self.pass_expires_at,
            cooldown_ends_at: 0,
        })
    }

    async fn is_pass_active(&self, _course_id: u128, _account: &Address) -> Result<bool> {
        self.log("is_pass_active");
        if self.fail_pass_reads {
            anyhow::bail!("rpc unavailable");
        }
        let bought = self.purchased.load(Ordering::SeqCst) && !self.withhold_pass_after_purchase;
        Ok(self.pass_active || bought)
    }

    async fn can_transfer(&self, _course_id: u128, _account: &Address) -> Result<TransferCheck> {
        self.log("can_transfer");
        Ok(TransferCheck {
            eligible: self.transfer_eligible,
            available_at: 0,
            expires_at: self.pass_expires_at,
        })
    }

    async fn is_approved_for_all(&self, _owner: &Address, _operator: &Address) -> Result<bool> {
        self.log("is_approved_for_all");
        Ok(self.approved_for_all)
    }

    async fn set_approval_for_all(&self, _operator: &Address, _approved: bool) -> Result<TxHash> {
        self.log("set_approval_for_all");
        Ok(TxHash("0x5e".to_string()))
    }
}

#[async_trait]
impl MarketplaceContract for FakeChain {
    async fn purchase_primary(&self, _course_id: u128, _max_price: Usdc) -> Result<TxHash> {
        self.log("purchase_primary");
        self.purchased.store(true, Ordering::SeqCst);
        Ok(TxHash("0xbeef".to_string()))
    }

    async fn create_listing(
        &self,
        _course_id: u128,
        _price_usdc: Usdc,
        _duration_secs: u64,
    ) -> Result<TxHash> {
        self.log("create_listing");
        Ok(TxHash("0x11".to_string()))
    }

    async fn cancel_listing(&self, _course_id: u128) -> Result<TxHash> {
        self.log("cancel_listing");
        Ok(TxHash("0x12".to_string()))
    }

    async fn buy_listing(
        &self,
        _course_id: u128,
        _seller: &Address,
        _max_price: Usdc,
    ) -> Result<TxHash> {
        self.log("buy_listing");
        Ok(TxHash("0x13".to_string()))
    }

    async fn renew(&self, _course_id: u128, _max_price: Usdc) -> Result<TxHash> {
        self.log("renew");
        Ok(TxHash("0x14".to_string()))
    }

    async fn get_active_listings(&self, _course_id: u128) -> Result<Vec<Listing>> {
        self.log("get_active_listings");
        Ok(self.listings.clone())
    }
}

#[async_trait]
impl RegistrarContract for FakeChain {
    async fn register_course(
        &self,
        _course_id: u128,
        _price_usdc: Usdc,
        _recipients: &[Address],
        _shares_bps: &[u32],
        _duration_secs: u64,
        _transfer_cooldown_secs: u64,
    ) -> Result<Address> {
        self.log("register_course");
        Ok(addr(9))
    }
}

#[async_trait]
impl ReceiptWaiter for FakeChain {
    async fn wait_for_receipt(&self, tx_hash: &TxHash) -> Result<Confirmation> {
        self.log("wait_for_receipt");
        Ok(Confirmation {
            tx_hash: tx_hash.clone(),
            block_number: 1,
        })
    }
}

fn handles(chain: &Arc<FakeChain>) -> LedgerHandles {
    LedgerHandles {
        token: Some(chain.clone()),
        pass: Some(chain.clone()),
        marketplace: Some(chain.clone()),
        registrar: Some(chain.clone()),
        receipts: Some(chain.clone()),
    }
}

fn chain_config() -> ChainConfig {
    ChainConfig {
        chain_id: 84532,
        rpc_url: "http://localhost:8545".to_string(),
        usdc_address: Some(addr(100)),
        membership_address: Some(addr(101)),
        marketplace_address: Some(addr(102)),
        registrar_address: Some(addr(103)),
        treasury_address: None,
        default_membership_duration_secs: 30 * 24 * 3600,
        default_transfer_cooldown_secs: 7 * 24 * 3600,
        default_subscription_price: 99.0,
    }
}

async fn test_store() -> (TempDir, DataStore) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    let store = DataStore::new(&url, 64).await.unwrap();
    store.init().await.unwrap();
    (dir, store)
}

/// A monthly group priced in USDC whose course id resolves from the
/// subscription id.
async fn paid_group(store: &DataStore, owner: &Address, price: f64) -> Group {
    let group = store.create_group(owner, "Pro Traders", None).await.unwrap();
    let update = GroupSettingsUpdate {
        billing_cadence: BillingCadence::Monthly,
        price,
        ..Default::default()
    };
    store
        .update_group_settings(group.id, owner, &update)
        .await
        .unwrap();
    store
        .update_subscription(group.id, "77", current_time_millis() + 86_400_000)
        .await
        .unwrap();
    store.require_group(group.id).await.unwrap()
}

#[tokio::test]
async fn test_free_join_never_touches_ledger() {
    let (_dir, store) = test_store().await;
    let chain = Arc::new(FakeChain::default());
    let ledger = handles(&chain);
    let config = chain_config();
    let workflow = SettlementWorkflow::new(&store, &ledger, &config);

    let owner = addr(1);
    let member = addr(2);
    let group = store.create_group(&owner, "Book Club", None).await.unwrap();

    let outcome = workflow
        .join(group.id, &member, &AbortHandle::new())
        .await
        .unwrap();

    assert!(chain.calls().is_empty());
    assert!(outcome.tx_hash.is_none());
    assert!(outcome.amount_paid.is_none());
    assert_eq!(outcome.membership.has_active_pass, Some(false));

    let refreshed = store.require_group(group.id).await.unwrap();
    assert_eq!(refreshed.member_count, 2);
}

#[tokio::test]
async fn test_active_pass_skips_payment() {
    let (_dir, store) = test_store().await;
    let expires_secs = (current_time_millis() / 1000 + 86_400) as u64;
    let chain = Arc::new(FakeChain {
        pass_active: true,
        pass_expires_at: expires_secs,
        ..FakeChain::default()
    });
    let ledger = handles(&chain);
    let config = chain_config();
    let workflow = SettlementWorkflow::new(&store, &ledger, &config);

    let owner = addr(1);
    let member = addr(2);
    let group = paid_group(&store, &owner, 49.0).await;

    let outcome = workflow
        .join(group.id, &member, &AbortHandle::new())
        .await
        .unwrap();

    assert!(chain.called("is_pass_active"));
    assert!(!chain.called("balance_of"));
    assert!(!chain.called("approve"));
    assert!(!chain.called("purchase_primary"));
    assert!(outcome.skipped_payment);
    assert_eq!(outcome.membership.has_active_pass, Some(true));
    // Second-based contract value comes back normalized to milliseconds.
    assert_eq!(
        outcome.membership.pass_expires_at,
        Some(expires_secs as i64 * 1000)
    );
}

#[tokio::test]
async fn test_insufficient_balance_blocks_payment() {
    let (_dir, store) = test_store().await;
    let chain = Arc::new(FakeChain {
        balance: Usdc::from_decimal(1.0),
        ..FakeChain::default()
    });
    let ledger = handles(&chain);
    let config = chain_config();
    let workflow = SettlementWorkflow::new(&store, &ledger, &config);

    let owner = addr(1);
    let member = addr(2);
    let group = paid_group(&store, &owner, 49.0).await;

    let err = workflow
        .join(group.id, &member, &AbortHandle::new())
        .await
        .unwrap_err();

    match err {
        JoinFailure::InsufficientBalance { required, available } => {
            assert_eq!(required, Usdc::from_decimal(49.0));
            assert_eq!(available, Usdc::from_decimal(1.0));
        }
        other => panic!("expected insufficient balance, got {:?}", other),
    }

    assert!(chain.called("balance_of"));
    assert!(!chain.called("approve"));
    assert!(!chain.called("purchase_primary"));
    assert!(store
        .get_membership(group.id, &member)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_paid_join_full_path() {
    let (_dir, store) = test_store().await;
    let chain = Arc::new(FakeChain::default());
    let ledger = handles(&chain);
    let config = chain_config();
    let workflow = SettlementWorkflow::new(&store, &ledger, &config);

    let owner = addr(1);
    let member = addr(2);
    let group = paid_group(&store, &owner, 49.0).await;

    let outcome = workflow
        .join(group.id, &member, &AbortHandle::new())
        .await
        .unwrap();

    let calls = chain.calls();
    let pos = |name: &str| calls.iter().position(|c| c == name).unwrap();
    assert!(pos("balance_of") < pos("allowance"));
    assert!(pos("allowance") < pos("approve"));
    assert!(pos("approve") < pos("purchase_primary"));

    assert_eq!(outcome.tx_hash.as_ref().map(|t| t.as_str()), Some("0xbeef"));
    assert_eq!(outcome.amount_paid, Some(Usdc::from_decimal(49.0)));

    let membership = store
        .get_membership(group.id, &member)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(membership.has_active_pass, Some(true));
    assert_eq!(membership.join_tx_hash.as_deref(), Some("0xbeef"));
}

#[tokio::test]
async fn test_existing_allowance_skips_approval() {
    let (_dir, store) = test_store().await;
    let chain = Arc::new(FakeChain {
        allowance: Usdc::MAX,
        ..FakeChain::default()
    });
    let ledger = handles(&chain);
    let config = chain_config();
    let workflow = SettlementWorkflow::new(&store, &ledger, &config);

    let owner = addr(1);
    let member = addr(2);
    let group = paid_group(&store, &owner, 49.0).await;

    workflow
        .join(group.id, &member, &AbortHandle::new())
        .await
        .unwrap();

    assert!(!chain.called("approve"));
    assert!(chain.called("purchase_primary"));
}

#[tokio::test]
async fn test_payment_unconfirmed_when_pass_not_delivered() {
    let (_dir, store) = test_store().await;
    let chain = Arc::new(FakeChain {
        withhold_pass_after_purchase: true,
        ..FakeChain::default()
    });
    let ledger = handles(&chain);
    let config = chain_config();
    let workflow = SettlementWorkflow::new(&store, &ledger, &config);

    let owner = addr(1);
    let member = addr(2);
    let group = paid_group(&store, &owner, 49.0).await;

    let err = workflow
        .join(group.id, &member, &AbortHandle::new())
        .await
        .unwrap_err();

    match err {
        JoinFailure::PaymentUnconfirmed { tx_hash } => {
            assert_eq!(tx_hash.as_str(), "0xbeef");
        }
        other => panic!("expected unconfirmed payment, got {:?}", other),
    }

    // Money moved but no membership record was written.
    assert!(store
        .get_membership(group.id, &member)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_cached_expiry_covers_unavailable_chain_reads() {
    let (_dir, store) = test_store().await;
    let future = current_time_millis() + 86_400_000;

    let owner = addr(1);
    let member = addr(2);

    let chain = Arc::new(FakeChain {
        fail_pass_reads: true,
        ..FakeChain::default()
    });
    let ledger = handles(&chain);
    let config = chain_config();
    let workflow = SettlementWorkflow::new(&store, &ledger, &config);

    let group = paid_group(&store, &owner, 49.0).await;

    // A previous paid join left an unexpired pass behind, then the member left.
    store
        .join_group(group.id, &member, None, true, Some(future))
        .await
        .unwrap();
    store
        .leave_group(group.id, &member, Some(future))
        .await
        .unwrap();

    let outcome = workflow
        .join(group.id, &member, &AbortHandle::new())
        .await
        .unwrap();

    assert!(outcome.skipped_payment);
    assert_eq!(outcome.membership.pass_expires_at, Some(future));
    assert!(!chain.called("balance_of"));
    assert!(!chain.called("purchase_primary"));
}

#[tokio::test]
async fn test_aborted_join_stops_before_settlement() {
    let (_dir, store) = test_store().await;
    let chain = Arc::new(FakeChain::default());
    let ledger = handles(&chain);
    let config = chain_config();
    let workflow = SettlementWorkflow::new(&store, &ledger, &config);

    let owner = addr(1);
    let member = addr(2);
    let group = paid_group(&store, &owner, 49.0).await;

    let abort = AbortHandle::new();
    abort.abort();

    let err = workflow.join(group.id, &member, &abort).await.unwrap_err();
    assert!(matches!(err, JoinFailure::Aborted));
    assert!(chain.calls().is_empty());
}

#[tokio::test]
async fn test_missing_ledger_is_a_configuration_error() {
    let (_dir, store) = test_store().await;
    let ledger = LedgerHandles::default();
    let config = chain_config();
    let workflow = SettlementWorkflow::new(&store, &ledger, &config);

    let owner = addr(1);
    let member = addr(2);
    let group = paid_group(&store, &owner, 49.0).await;

    let err = workflow
        .join(group.id, &member, &AbortHandle::new())
        .await
        .unwrap_err();
    assert!(matches!(err, JoinFailure::NotConfigured(_)));
}

#[tokio::test]
async fn test_listing_requires_operator_approval_first() {
    let chain = Arc::new(FakeChain::default());
    let ledger = handles(&chain);
    let config = chain_config();
    let marketplace = MarketplaceService::new(&ledger, &config);

    let seller = addr(2);
    marketplace
        .create_listing(77, &seller, Usdc::from_decimal(25.0), None)
        .await
        .unwrap();

    let calls = chain.calls();
    let pos = |name: &str| calls.iter().position(|c| c == name).unwrap();
    assert!(pos("is_approved_for_all") < pos("set_approval_for_all"));
    assert!(pos("set_approval_for_all") < pos("create_listing"));
}

#[tokio::test]
async fn test_listing_rejects_odd_duration_and_cooldown() {
    let chain = Arc::new(FakeChain {
        approved_for_all: true,
        ..FakeChain::default()
    });
    let ledger = handles(&chain);
    let config = chain_config();
    let marketplace = MarketplaceService::new(&ledger, &config);

    let seller = addr(2);
    let err = marketplace
        .create_listing(77, &seller, Usdc::from_decimal(25.0), Some(4_000))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("duration"));

    let chain = Arc::new(FakeChain {
        transfer_eligible: false,
        ..FakeChain::default()
    });
    let ledger = handles(&chain);
    let marketplace = MarketplaceService::new(&ledger, &config);
    let err = marketplace
        .create_listing(77, &seller, Usdc::from_decimal(25.0), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cooldown"));
    assert!(!chain.called("create_listing"));
}

#[tokio::test]
async fn test_buy_floor_picks_cheapest_listing() {
    let listing = |seller: Address, price: f64| Listing {
        seller,
        price_usdc: Usdc::from_decimal(price),
        listed_at: 0,
        expires_at: u64::MAX,
        active: true,
    };
    let chain = Arc::new(FakeChain {
        listings: vec![listing(addr(5), 40.0), listing(addr(6), 25.0), listing(addr(7), 31.0)],
        ..FakeChain::default()
    });
    let ledger = handles(&chain);
    let config = chain_config();
    let marketplace = MarketplaceService::new(&ledger, &config);

    let buyer = addr(2);
    let tx = marketplace.buy_floor(77, &buyer).await.unwrap();
    assert_eq!(tx.as_str(), "0x13");

    let overview = marketplace.course_overview(77, Some(&buyer)).await.unwrap();
    assert_eq!(overview.floor_price, Some(Usdc::from_decimal(25.0)));
}
