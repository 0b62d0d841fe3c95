// Course/pass resolver - derives the numeric membership course id for a group
// and normalizes contract expiry timestamps

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::time::MS_EPOCH_THRESHOLD;

static COURSE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:course|pass|membership):([0-9]+)$").unwrap());

/// Resolve the on-chain course id for a community.
///
/// Precedence: an explicit subscription id string wins; otherwise the tag list
/// is scanned for `course:<digits>` / `pass:<digits>` / `membership:<digits>`
/// (case-insensitive). Parse failures fall through to the next strategy, and
/// `None` means "membership course not configured" - paid-join flows must
/// block on that rather than proceed.
pub fn resolve_membership_course_id(
    subscription_id: Option<&str>,
    tags: &[String],
) -> Option<u128> {
    if let Some(raw) = subscription_id {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            if let Ok(numeric) = trimmed.parse::<u128>() {
                if numeric > 0 {
                    return Some(numeric);
                }
            }
        }
    }

    for tag in tags {
        let normalized = tag.trim().to_lowercase();
        if let Some(captures) = COURSE_TAG.captures(&normalized) {
            if let Ok(numeric) = captures[1].parse::<u128>() {
                if numeric > 0 {
                    return Some(numeric);
                }
            }
        }
    }

    None
}

/// Normalize a raw pass expiry from the contract into a millisecond epoch.
///
/// The contract does not disambiguate seconds vs. milliseconds; anything below
/// `1_000_000_000_000` is treated as seconds. Zero or out-of-range values mean
/// "no expiry recorded".
pub fn normalize_pass_expiry(expires_at: u64) -> Option<i64> {
    if expires_at == 0 || expires_at > i64::MAX as u64 {
        return None;
    }
    let numeric = expires_at as i64;
    if numeric < MS_EPOCH_THRESHOLD {
        numeric.checked_mul(1000)
    } else {
        Some(numeric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_explicit_subscription_id_wins() {
        let resolved =
            resolve_membership_course_id(Some("7"), &tags(&["pass:42", "community"]));
        assert_eq!(resolved, Some(7));
    }

    #[test]
    fn test_tag_fallback() {
        assert_eq!(resolve_membership_course_id(None, &tags(&["pass:42"])), Some(42));
        assert_eq!(
            resolve_membership_course_id(None, &tags(&["tech", "Course:9"])),
            Some(9)
        );
        assert_eq!(
            resolve_membership_course_id(None, &tags(&["membership:123"])),
            Some(123)
        );
    }

    #[test]
    fn test_bad_subscription_id_falls_through_to_tags() {
        assert_eq!(
            resolve_membership_course_id(Some("not-a-number"), &tags(&["pass:42"])),
            Some(42)
        );
        assert_eq!(resolve_membership_course_id(Some("0"), &tags(&[])), None);
    }

    #[test]
    fn test_unconfigured_resolves_to_none() {
        assert_eq!(resolve_membership_course_id(None, &tags(&["tech", "wellness"])), None);
        assert_eq!(resolve_membership_course_id(Some("  "), &tags(&[])), None);
    }

    #[test]
    fn test_expiry_normalization() {
        // seconds scale up
        assert_eq!(normalize_pass_expiry(1_700_000_000), Some(1_700_000_000_000));
        // already-millisecond values are idempotent
        assert_eq!(normalize_pass_expiry(1_700_000_000_000), Some(1_700_000_000_000));
        // zero means no expiry recorded
        assert_eq!(normalize_pass_expiry(0), None);
        // values that cannot fit a signed epoch are discarded
        assert_eq!(normalize_pass_expiry(u64::MAX), None);
    }
}
