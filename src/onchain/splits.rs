// Revenue split calculator - owner + collaborator shares in basis points

use serde::{Deserialize, Serialize};

use crate::core::Address;

/// Whole pie in basis points.
pub const TOTAL_SHARE_BPS: u32 = 10_000;

/// A collaborator entry as stored with the group settings. Entries with a zero
/// share are filtered before they reach the calculator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorShare {
    pub wallet_address: Address,
    pub share_bps: u32,
}

/// Normalized recipient/share arrays for the course registrar. The parallel
/// arrays always have equal, non-zero length and the shares sum to exactly
/// 10_000.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueSplit {
    pub recipients: Vec<Address>,
    pub shares_bps: Vec<u32>,
}

impl RevenueSplit {
    /// Build the payout split for a course: collaborators keep their declared
    /// basis points (clamped so their total never exceeds the pie) and the
    /// owner takes the remainder. With no collaborators the owner takes all
    /// 10_000 bps. Any rounding drift is trimmed onto the last entry.
    pub fn compute(owner: &Address, collaborators: &[CollaboratorShare]) -> RevenueSplit {
        let mut recipients = Vec::new();
        let mut shares_bps = Vec::new();

        let mut admin_total: u32 = 0;
        for entry in collaborators.iter().filter(|c| c.share_bps > 0) {
            recipients.push(entry.wallet_address.clone());
            shares_bps.push(entry.share_bps);
            admin_total = admin_total.saturating_add(entry.share_bps);
        }

        let admin_total = admin_total.min(TOTAL_SHARE_BPS);
        let owner_share = TOTAL_SHARE_BPS - admin_total;

        if owner_share > 0 || recipients.is_empty() {
            recipients.push(owner.clone());
            shares_bps.push(if owner_share > 0 { owner_share } else { TOTAL_SHARE_BPS });
        }

        // Re-check the total and absorb any drift into the last entry.
        let total: u32 = shares_bps.iter().sum();
        if total != TOTAL_SHARE_BPS {
            if let Some(last) = shares_bps.last_mut() {
                let adjusted = *last as i64 + (TOTAL_SHARE_BPS as i64 - total as i64);
                *last = adjusted.max(0) as u32;
            }
        }

        RevenueSplit { recipients, shares_bps }
    }

    pub fn total_bps(&self) -> u32 {
        self.shares_bps.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::parse(&format!("0x{:040x}", n)).unwrap()
    }

    fn collab(n: u8, share_bps: u32) -> CollaboratorShare {
        CollaboratorShare { wallet_address: addr(n), share_bps }
    }

    #[test]
    fn test_owner_takes_all_without_collaborators() {
        let split = RevenueSplit::compute(&addr(1), &[]);
        assert_eq!(split.recipients, vec![addr(1)]);
        assert_eq!(split.shares_bps, vec![10_000]);
    }

    #[test]
    fn test_owner_keeps_remainder() {
        let split = RevenueSplit::compute(&addr(1), &[collab(2, 2_500), collab(3, 1_500)]);
        assert_eq!(split.recipients, vec![addr(2), addr(3), addr(1)]);
        assert_eq!(split.shares_bps, vec![2_500, 1_500, 6_000]);
        assert_eq!(split.total_bps(), 10_000);
    }

    #[test]
    fn test_collaborators_consuming_whole_pie() {
        let split = RevenueSplit::compute(&addr(1), &[collab(2, 6_000), collab(3, 4_000)]);
        // No owner entry when nothing remains.
        assert_eq!(split.recipients, vec![addr(2), addr(3)]);
        assert_eq!(split.total_bps(), 10_000);
    }

    #[test]
    fn test_overflowing_collaborators_are_clamped() {
        let split = RevenueSplit::compute(&addr(1), &[collab(2, 9_000), collab(3, 3_000)]);
        assert_eq!(split.total_bps(), 10_000);
        assert!(split.shares_bps.iter().all(|&s| s <= 10_000));
        // Overflow was trimmed off the last entry.
        assert_eq!(split.shares_bps, vec![9_000, 1_000]);
    }

    #[test]
    fn test_zero_share_entries_are_dropped() {
        let split = RevenueSplit::compute(&addr(1), &[collab(2, 0), collab(3, 500)]);
        assert_eq!(split.recipients, vec![addr(3), addr(1)]);
        assert_eq!(split.shares_bps, vec![500, 9_500]);
    }

    #[test]
    fn test_sum_invariant_across_inputs() {
        let cases: Vec<Vec<CollaboratorShare>> = vec![
            vec![collab(2, 1)],
            vec![collab(2, 9_999)],
            vec![collab(2, 10_000)],
            vec![collab(2, 3_333), collab(3, 3_333), collab(4, 3_333)],
            vec![collab(2, 5_000), collab(3, 5_000), collab(4, 5_000)],
        ];
        for collaborators in cases {
            let split = RevenueSplit::compute(&addr(1), &collaborators);
            assert_eq!(split.total_bps(), 10_000, "input: {:?}", collaborators);
            assert_eq!(split.recipients.len(), split.shares_bps.len());
            assert!(!split.recipients.is_empty());
        }
    }
}
