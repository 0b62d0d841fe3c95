// Visibility and access resolution - pure capability map over a group record

use serde::Serialize;

use crate::core::current_time_millis;
use crate::store::models::{Group, Visibility};

/// What a given viewer may see of a group. `about` is always open; the other
/// panels open for public groups, members and the owner. An expired platform
/// subscription withholds every content panel, owner included, so the owner
/// sees the renewal prompt the same way a visitor sees the about page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GroupAccess {
    pub is_owner: bool,
    pub is_member: bool,
    pub expired: bool,
    pub about: bool,
    pub feed: bool,
    pub classroom: bool,
    pub members: bool,
}

/// Deterministic in its three inputs; no lookups happen here. The caller
/// resolves `is_member` from the membership record beforehand.
pub fn resolve_access(group: &Group, viewer_id: Option<i64>, is_member: bool) -> GroupAccess {
    let is_owner = viewer_id == Some(group.owner_id);
    let expired = group
        .ends_on
        .map(|ends_on| ends_on < current_time_millis())
        .unwrap_or(false);

    let content = !expired
        && (group.visibility == Visibility::Public || is_member || is_owner);

    GroupAccess {
        is_owner,
        is_member,
        expired,
        about: true,
        feed: content,
        classroom: content,
        members: content,
    }
}
