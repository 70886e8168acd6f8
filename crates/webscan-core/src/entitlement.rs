//! Roles, subscription status and admission policy
//!
//! `User.role` is a denormalized mirror of the latest subscription status and
//! is only written by the billing event processor. At read time the latest
//! subscription row is the source of truth for pro-ness; the stored role
//! still decides admin access.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scans per UTC calendar day for free-tier users.
pub const DAILY_FREE_LIMIT: i64 = 3;

/// Stored user role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Free,
    Pro,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Free => "free",
            Role::Pro => "pro",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(Role::Free),
            "pro" => Some(Role::Pro),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription status as surfaced by the billing provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    Trialing,
    Incomplete,
    Unpaid,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::Unpaid => "unpaid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "canceled" => Some(SubscriptionStatus::Canceled),
            "trialing" => Some(SubscriptionStatus::Trialing),
            "incomplete" => Some(SubscriptionStatus::Incomplete),
            "unpaid" => Some(SubscriptionStatus::Unpaid),
            _ => None,
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's effective access level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Entitlement {
    pub role: Role,
    pub is_pro: bool,
}

impl Entitlement {
    /// Pro and admin users are not metered by the daily quota.
    pub fn is_unmetered(&self) -> bool {
        self.is_pro || self.role == Role::Admin
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Admission {
    pub fn allowed() -> Self {
        Admission {
            allowed: true,
            reason: None,
        }
    }

    pub fn denied(reason: String) -> Self {
        Admission {
            allowed: false,
            reason: Some(reason),
        }
    }
}

pub fn quota_exceeded_reason() -> String {
    format!(
        "Free users are limited to {DAILY_FREE_LIMIT} scans per day. \
         Upgrade to Pro for unlimited scans."
    )
}

/// Admission decision for a metered user given today's usage.
pub fn admit_metered(daily_count: i64) -> Admission {
    if daily_count >= DAILY_FREE_LIMIT {
        Admission::denied(quota_exceeded_reason())
    } else {
        Admission::allowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_user_admitted_below_limit() {
        assert!(admit_metered(0).allowed);
        assert!(admit_metered(2).allowed);
    }

    #[test]
    fn free_user_denied_at_limit() {
        let denied = admit_metered(DAILY_FREE_LIMIT);
        assert!(!denied.allowed);
        assert!(denied.reason.unwrap().contains("3 scans per day"));
        assert!(!admit_metered(DAILY_FREE_LIMIT + 1).allowed);
    }

    #[test]
    fn active_subscription_is_unmetered_regardless_of_role() {
        let ent = Entitlement {
            role: Role::Free,
            is_pro: true,
        };
        assert!(ent.is_unmetered());
    }

    #[test]
    fn admin_is_unmetered_without_subscription() {
        let ent = Entitlement {
            role: Role::Admin,
            is_pro: false,
        };
        assert!(ent.is_unmetered());
    }

    #[test]
    fn free_user_without_subscription_is_metered() {
        let ent = Entitlement {
            role: Role::Free,
            is_pro: false,
        };
        assert!(!ent.is_unmetered());
    }

    #[test]
    fn subscription_status_parses_provider_strings() {
        assert_eq!(
            SubscriptionStatus::parse("past_due"),
            Some(SubscriptionStatus::PastDue)
        );
        assert_eq!(SubscriptionStatus::parse("paused"), None);
    }
}
