//! Acting user and monetized entitlement views used by the clock gate.

use serde::Serialize;

/// Subscription type that never counts as paid.
pub const TRIAL_TYPE: &str = "trial";
pub const ACTIVE_STATUS: &str = "active";

/// The user on whose behalf a sync cycle runs, resolved from the local
/// authentication rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActingUser {
    pub user_uuid: String,
    /// Authentication (session) row for this device.
    pub auth_uuid: String,
    pub is_logged_in: bool,
    /// Device-local JWT, used as the bearer for remote calls.
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
}

/// A subscription as seen by the clock gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub uuid: String,
    pub user_uuid: String,
    pub status: Option<String>,
    pub kind: Option<String>,
    pub tampered: bool,
    pub deleted_at: Option<String>,
}

impl Entitlement {
    /// Active, not deleted and not a trial.
    pub fn is_active_paid(&self) -> bool {
        self.deleted_at.is_none()
            && self.status.as_deref() == Some(ACTIVE_STATUS)
            && self.kind.as_deref() != Some(TRIAL_TYPE)
    }
}
