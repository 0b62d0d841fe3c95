// Membership domain - settlement workflow, marketplace flows, access gating

pub mod access;
pub mod marketplace;
pub mod workflow;

pub use access::{resolve_access, GroupAccess};
pub use marketplace::MarketplaceService;
pub use workflow::{
    AbortHandle, JoinFailure, JoinOutcome, JoinState, LeaveDisclosure, LedgerHandles,
    SettlementWorkflow,
};
