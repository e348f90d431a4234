// src/models/subscription.rs

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl TryFrom<String> for SubscriptionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(format!("unknown subscription status '{other}'")),
        }
    }
}

/// A user's subscription to a paid category, as reported by the payment side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: i64,
    pub category_id: i64,
    pub status: SubscriptionStatus,
}

impl Subscription {
    pub fn is_approved(&self) -> bool {
        self.status == SubscriptionStatus::Approved
    }
}
