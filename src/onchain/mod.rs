// On-chain collaborators - ledger client surface, course resolution, revenue splits

pub mod ledger;
pub mod resolver;
pub mod splits;

pub use ledger::{
    CourseData, Confirmation, Listing, MarketplaceContract, PassContract, PassState,
    ReceiptWaiter, RegistrarContract, TokenContract, TransferCheck,
};
pub use resolver::{normalize_pass_expiry, resolve_membership_course_id};
pub use splits::RevenueSplit;
