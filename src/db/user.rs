//! User model types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::datetime;

/// Subscription tier of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    /// Time-limited trial started at first interaction.
    Trial,
    /// Standard paid tier.
    Standard,
    /// Premium paid tier.
    Premium,
    /// Lapsed subscription. Authenticated actions are denied until an
    /// admin grant restores a paid tier.
    Expired,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Trial => "trial",
            SubscriptionTier::Standard => "standard",
            SubscriptionTier::Premium => "premium",
            SubscriptionTier::Expired => "expired",
        }
    }

    /// Whether this tier admits authenticated actions at all.
    pub fn is_entitled(&self) -> bool {
        !matches!(self, SubscriptionTier::Expired)
    }
}

impl std::str::FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trial" => Ok(SubscriptionTier::Trial),
            "standard" => Ok(SubscriptionTier::Standard),
            "premium" => Ok(SubscriptionTier::Premium),
            "expired" => Ok(SubscriptionTier::Expired),
            _ => Err(format!("Invalid subscription tier: {}", s)),
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered user row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// Identity in the fronting messenger or client.
    pub external_id: i64,
    pub display_name: Option<String>,
    pub tier: String,
    pub subscription_expires_at: Option<String>,
    pub is_blocked: bool,
    pub blocked_at: Option<String>,
    pub trial_started_at: String,
    pub upload_count: i64,
    pub download_count: i64,
    pub is_active: bool,
    pub reminder_sent: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    /// Parsed tier, defaulting to trial for unknown stored values.
    pub fn tier(&self) -> SubscriptionTier {
        self.tier.parse().unwrap_or(SubscriptionTier::Trial)
    }

    /// Parsed subscription expiry, if any.
    pub fn subscription_expires_at(&self) -> Option<DateTime<Utc>> {
        self.subscription_expires_at
            .as_deref()
            .and_then(datetime::from_sqlite)
    }

    /// End of the trial window, computed from when the trial started.
    pub fn trial_ends_at(&self, trial_days: i64) -> Option<DateTime<Utc>> {
        datetime::from_sqlite(&self.trial_started_at).map(|start| start + Duration::days(trial_days))
    }

    /// Whether the subscription (paid or trial) is still current at `now`.
    pub fn is_current(&self, now: DateTime<Utc>, trial_days: i64) -> bool {
        match self.tier() {
            SubscriptionTier::Trial => self
                .trial_ends_at(trial_days)
                .is_some_and(|end| now < end),
            SubscriptionTier::Standard | SubscriptionTier::Premium => self
                .subscription_expires_at()
                .is_none_or(|end| now < end),
            SubscriptionTier::Expired => false,
        }
    }
}

/// Data for creating a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub external_id: i64,
    pub display_name: Option<String>,
}

/// Partial user update. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub display_name: Option<String>,
    pub tier: Option<SubscriptionTier>,
    pub subscription_expires_at: Option<Option<String>>,
    pub is_blocked: Option<bool>,
    pub is_active: Option<bool>,
    pub reminder_sent: Option<bool>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.tier.is_none()
            && self.subscription_expires_at.is_none()
            && self.is_blocked.is_none()
            && self.is_active.is_none()
            && self.reminder_sent.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_user() -> User {
        User {
            id: 1,
            external_id: 42,
            display_name: Some("alice".to_string()),
            tier: "trial".to_string(),
            subscription_expires_at: None,
            is_blocked: false,
            blocked_at: None,
            trial_started_at: "2025-06-01 12:00:00".to_string(),
            upload_count: 0,
            download_count: 0,
            is_active: true,
            reminder_sent: false,
            created_at: "2025-06-01 12:00:00".to_string(),
            updated_at: "2025-06-01 12:00:00".to_string(),
        }
    }

    #[test]
    fn test_tier_round_trip() {
        for tier in [
            SubscriptionTier::Trial,
            SubscriptionTier::Standard,
            SubscriptionTier::Premium,
            SubscriptionTier::Expired,
        ] {
            assert_eq!(tier.as_str().parse::<SubscriptionTier>().unwrap(), tier);
        }
        assert!("gold".parse::<SubscriptionTier>().is_err());
    }

    #[test]
    fn test_trial_current_within_window() {
        let user = sample_user();
        let inside = Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2025, 6, 5, 0, 0, 0).unwrap();
        assert!(user.is_current(inside, 3));
        assert!(!user.is_current(outside, 3));
    }

    #[test]
    fn test_paid_tier_without_expiry_is_current() {
        let mut user = sample_user();
        user.tier = "premium".to_string();
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert!(user.is_current(now, 3));
    }

    #[test]
    fn test_paid_tier_with_past_expiry_is_lapsed() {
        let mut user = sample_user();
        user.tier = "standard".to_string();
        user.subscription_expires_at = Some("2025-06-10 00:00:00".to_string());
        let before = Utc.with_ymd_and_hms(2025, 6, 9, 0, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 6, 11, 0, 0, 0).unwrap();
        assert!(user.is_current(before, 3));
        assert!(!user.is_current(after, 3));
    }

    #[test]
    fn test_expired_tier_is_not_entitled() {
        assert!(!SubscriptionTier::Expired.is_entitled());
        assert!(SubscriptionTier::Trial.is_entitled());
    }

    #[test]
    fn test_unknown_stored_tier_defaults_to_trial() {
        let mut user = sample_user();
        user.tier = "whatever".to_string();
        assert_eq!(user.tier(), SubscriptionTier::Trial);
    }
}
