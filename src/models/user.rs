use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{JournalError, Result};

const DAY_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = JournalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(JournalError::Validation(format!("Unknown role: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Monthly,
    Annual,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Monthly => "monthly",
            Plan::Annual => "annual",
        }
    }

    /// List price in USD
    pub fn price(&self) -> f64 {
        match self {
            Plan::Free => 0.0,
            Plan::Monthly => 29.0,
            Plan::Annual => 290.0,
        }
    }

    /// Subscription length in seconds granted by one approved payment
    pub fn duration_secs(&self) -> i64 {
        match self {
            Plan::Free => 0,
            Plan::Monthly => 30 * DAY_SECS,
            Plan::Annual => 365 * DAY_SECS,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = JournalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "monthly" => Ok(Plan::Monthly),
            "annual" | "yearly" => Ok(Plan::Annual),
            other => Err(JournalError::Validation(format!("Unknown plan: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub role: Role,
    pub plan: Plan,
    pub subscription_expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SubscriptionState {
    Free,
    Pending { requested_plan: Plan },
    Active { plan: Plan, expires_at: i64 },
    Expired { plan: Plan, expired_at: i64 },
}

impl SubscriptionState {
    pub fn has_premium_access(&self) -> bool {
        matches!(self, SubscriptionState::Active { .. })
    }
}
