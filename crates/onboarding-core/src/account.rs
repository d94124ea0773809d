//! Permanent records
//!
//! What a committed session turns into. These are owned by the account side
//! of the system; onboarding only ever creates them through a
//! [`CommitTx`](crate::store::CommitTx).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! record_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

record_id!(UserId, "usr");
record_id!(WorkspaceId, "wrk");
record_id!(BusinessId, "biz");
record_id!(SubscriptionId, "sub");

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Business {
    pub id: BusinessId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub descriptor: String,
    pub country: String,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub workspace_id: WorkspaceId,
    pub plan_id: String,
    /// Provider subscription reference, for paid plans
    pub gateway_subscription: Option<String>,
    pub gateway_customer: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Identifiers created by a successful commit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub user_id: UserId,
    pub workspace_id: WorkspaceId,
    pub business_id: BusinessId,
    pub subscription_id: SubscriptionId,
    /// True when the user record already existed and was attached
    pub existing_user: bool,
}
