//! Classification of event actors.
//!
//! The events API does not say whether an actor is a user, a bot account, or
//! an organization; the actor URL does. `/users/{name}` is a user unless the
//! name carries the `[bot]` suffix, `/orgs/{name}` is an organization, and
//! anything else is unknown.

use once_cell::sync::Lazy;
use regex::Regex;

static USER_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^/]+/users/([^/]+)$").expect("static regex"));
static ORG_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^/]+/orgs/([^/]+)$").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorKind {
    User,
    Bot,
    Organization,
    Unknown,
    Absent,
}

pub fn classify(actor_url: Option<&str>) -> ActorKind {
    let Some(url) = actor_url.filter(|u| !u.is_empty()) else {
        return ActorKind::Absent;
    };

    if let Some(caps) = USER_URL.captures(url) {
        let name = &caps[1];
        // Bot logins appear both literally and percent-encoded in actor URLs.
        if name.ends_with("[bot]") || name.ends_with("%5Bbot%5D") {
            ActorKind::Bot
        } else {
            ActorKind::User
        }
    } else if ORG_URL.is_match(url) {
        ActorKind::Organization
    } else {
        ActorKind::Unknown
    }
}

/// Split the `owner/name` composite delivered by the events API. Returns
/// `None` when either side is empty or the separator is missing.
pub fn split_full_name(full_name: &str) -> Option<(&str, &str)> {
    let (owner, name) = full_name.split_once('/')?;
    if owner.is_empty() || name.is_empty() {
        return None;
    }
    Some((owner, name))
}
