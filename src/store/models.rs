// Store record types and the canonical group reconciliation

use serde::{Deserialize, Serialize};

use crate::core::Address;
use crate::error::{AppError, AppResult};
use crate::onchain::splits::{CollaboratorShare, TOTAL_SHARE_BPS};

pub const MAX_GROUP_NAME_LEN: usize = 60;
pub const MAX_DESCRIPTION_LEN: usize = 40_000;
pub const MAX_SHORT_DESCRIPTION_LEN: usize = 200;
pub const MAX_TAGS: usize = 8;
pub const MAX_GALLERY_ITEMS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }

    pub fn parse(raw: &str) -> Visibility {
        match raw {
            "public" => Visibility::Public,
            _ => Visibility::Private,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCadence {
    Free,
    Monthly,
}

impl BillingCadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCadence::Free => "free",
            BillingCadence::Monthly => "monthly",
        }
    }

    pub fn parse(raw: &str) -> BillingCadence {
        match raw {
            "monthly" => BillingCadence::Monthly,
            _ => BillingCadence::Free,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub wallet_address: Address,
    pub display_name: Option<String>,
}

/// A community record. Always passes through `Group::reconcile` on the way in
/// and out of the store, so downstream consumers see a fully-populated,
/// invariant-respecting shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub short_description: Option<String>,
    pub description: Option<String>,
    pub about_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub gallery_urls: Vec<String>,
    pub owner_id: i64,
    pub visibility: Visibility,
    pub billing_cadence: BillingCadence,
    pub price: f64,
    pub member_count: i64,
    pub tags: Vec<String>,
    pub subscription_id: Option<String>,
    pub ends_on: Option<i64>,
}

impl Group {
    /// Canonical reconciliation. Raw rows and raw settings payloads can carry
    /// conflicting combinations; after this pass the invariants hold:
    ///
    /// - `price` is finite and >= 0
    /// - `billing_cadence == Monthly` implies `price > 0` and `Private`
    /// - `price > 0` implies `Monthly`
    /// - tags are trimmed, lowercased, deduped, at most 8
    /// - gallery holds at most 10 entries
    /// - member count is at least 1 (the owner)
    pub fn reconcile(mut self) -> Group {
        if !self.price.is_finite() || self.price < 0.0 {
            self.price = 0.0;
        }

        if self.price > 0.0 {
            self.billing_cadence = BillingCadence::Monthly;
        } else if self.billing_cadence == BillingCadence::Monthly {
            // Monthly with no price cannot be billed.
            self.billing_cadence = BillingCadence::Free;
        }

        if self.billing_cadence == BillingCadence::Monthly {
            self.visibility = Visibility::Private;
        }

        self.tags = normalize_tags(&self.tags);
        self.gallery_urls.truncate(MAX_GALLERY_ITEMS);
        if let Some(short) = &self.short_description {
            if short.chars().count() > MAX_SHORT_DESCRIPTION_LEN {
                self.short_description =
                    Some(short.chars().take(MAX_SHORT_DESCRIPTION_LEN).collect());
            }
        }
        self.member_count = self.member_count.max(1);

        self
    }

    pub fn requires_payment(&self) -> bool {
        self.price > 0.0
    }
}

/// Membership record linking a user to a group, with the cached on-chain pass
/// fields used for display and as a defensive fallback when reads fail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: i64,
    pub group_id: i64,
    pub pass_expires_at: Option<i64>,
    pub has_active_pass: Option<bool>,
    pub join_tx_hash: Option<String>,
    pub joined_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdministratorShare {
    pub group_id: i64,
    pub wallet_address: Address,
    pub share_bps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: i64,
    pub group_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseModule {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub id: i64,
    pub module_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub video_url: Option<String>,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub group_id: i64,
    pub author_id: i64,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author_id: i64,
    pub content: String,
    pub created_at: i64,
}

/// Owner-submitted settings payload. `validate` rejects bad input before any
/// write happens; the accepted shape then flows through `Group::reconcile`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupSettingsUpdate {
    pub short_description: Option<String>,
    pub about_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub gallery_urls: Vec<String>,
    pub tags: Vec<String>,
    pub visibility: Visibility,
    pub billing_cadence: BillingCadence,
    pub price: f64,
    pub administrators: Vec<RawAdministrator>,
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::Private
    }
}

impl Default for BillingCadence {
    fn default() -> Self {
        BillingCadence::Free
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAdministrator {
    pub wallet_address: String,
    pub share_bps: u32,
}

impl GroupSettingsUpdate {
    /// Validate the payload against the owner's wallet. Returns the cleaned
    /// collaborator list; overflow past 10_000 bps is trimmed off the last
    /// entry and zero-share entries are dropped, mirroring how the settings
    /// form normalizes before submitting.
    pub fn validate(&self, owner_wallet: &Address) -> AppResult<Vec<CollaboratorShare>> {
        if let Some(short) = &self.short_description {
            if short.chars().count() > MAX_SHORT_DESCRIPTION_LEN {
                return Err(AppError::Validation(
                    "Keep the summary under 200 characters".to_string(),
                ));
            }
        }

        if self.gallery_urls.len() > MAX_GALLERY_ITEMS {
            return Err(AppError::Validation(format!(
                "Gallery cannot hold more than {} items",
                MAX_GALLERY_ITEMS
            )));
        }

        if normalize_tags(&self.tags).len() > MAX_TAGS {
            return Err(AppError::Validation(format!(
                "At most {} tags are allowed",
                MAX_TAGS
            )));
        }

        if self.billing_cadence == BillingCadence::Monthly && self.price <= 0.0 {
            return Err(AppError::Validation(
                "Monthly pricing requires a price greater than zero".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        let mut cleaned = Vec::new();
        let mut total: u32 = 0;

        for raw in &self.administrators {
            let wallet = Address::parse(&raw.wallet_address)
                .map_err(|e| AppError::Validation(e.to_string()))?;

            if wallet == *owner_wallet {
                return Err(AppError::Validation(
                    "The group owner receives the remaining share automatically".to_string(),
                ));
            }

            if !seen.insert(wallet.clone()) {
                return Err(AppError::Validation(format!(
                    "Duplicate administrator: {}",
                    wallet
                )));
            }

            if raw.share_bps == 0 || raw.share_bps > TOTAL_SHARE_BPS {
                return Err(AppError::Validation(
                    "Administrator share must be between 1 and 10000 basis points".to_string(),
                ));
            }

            total = total.saturating_add(raw.share_bps);
            cleaned.push(CollaboratorShare { wallet_address: wallet, share_bps: raw.share_bps });
        }

        if total > TOTAL_SHARE_BPS {
            let mut overflow = total - TOTAL_SHARE_BPS;
            if let Some(last) = cleaned.last_mut() {
                let trimmed = last.share_bps.saturating_sub(overflow);
                overflow = overflow.saturating_sub(last.share_bps - trimmed);
                last.share_bps = trimmed;
            }
            if overflow > 0 {
                return Err(AppError::Validation(
                    "Total administrator share cannot exceed 100%".to_string(),
                ));
            }
            cleaned.retain(|entry| entry.share_bps > 0);
        }

        Ok(cleaned)
    }
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut normalized = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if tag.is_empty() || !seen.insert(tag.clone()) {
            continue;
        }
        normalized.push(tag);
        if normalized.len() == MAX_TAGS {
            break;
        }
    }
    normalized
}
