//! Guardian grants and the permission gate
//!
//! A guardian receives a user's events only through an authoritative grant
//! (`status = Approved` and `active`) whose permission flag covers the
//! event class. The gate re-reads grants on every call.

use crate::auth::principal::PrincipalId;
use crate::events::EventClass;
use crate::storage::{GuardianRelationshipStore, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Lifecycle of a guardianship request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrantStatus {
    Pending,
    Approved,
    Revoked,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::Pending => "PENDING",
            GrantStatus::Approved => "APPROVED",
            GrantStatus::Revoked => "REVOKED",
        }
    }
}

impl fmt::Display for GrantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(GrantStatus::Pending),
            "APPROVED" => Ok(GrantStatus::Approved),
            "REVOKED" => Ok(GrantStatus::Revoked),
            other => Err(format!("unknown grant status '{}'", other)),
        }
    }
}

/// A single permission flag on a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewLocation,
    ViewActivity,
    ReceiveAlerts,
    ModifySettings,
}

impl Permission {
    /// The permission an event class requires
    pub fn required_for(class: EventClass) -> Self {
        match class {
            EventClass::Location => Permission::ViewLocation,
            EventClass::Activity => Permission::ViewActivity,
            EventClass::Emergency | EventClass::Medication => Permission::ReceiveAlerts,
        }
    }
}

/// Permission flags held by a guardian
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianPermissions {
    pub view_location: bool,
    pub view_activity: bool,
    pub receive_alerts: bool,
    pub modify_settings: bool,
}

impl GuardianPermissions {
    pub fn all() -> Self {
        Self {
            view_location: true,
            view_activity: true,
            receive_alerts: true,
            modify_settings: true,
        }
    }

    pub fn allows(&self, permission: Permission) -> bool {
        match permission {
            Permission::ViewLocation => self.view_location,
            Permission::ViewActivity => self.view_activity,
            Permission::ReceiveAlerts => self.receive_alerts,
            Permission::ModifySettings => self.modify_settings,
        }
    }
}

/// Relationship letting `guardian_id` receive `subject_user_id`'s events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianGrant {
    pub guardian_id: PrincipalId,
    pub subject_user_id: PrincipalId,
    pub status: GrantStatus,
    pub permissions: GuardianPermissions,
    pub is_primary: bool,
    pub active: bool,
}

impl GuardianGrant {
    /// An approved, active grant with the given permissions
    pub fn approved(
        guardian_id: PrincipalId,
        subject_user_id: PrincipalId,
        permissions: GuardianPermissions,
    ) -> Self {
        Self {
            guardian_id,
            subject_user_id,
            status: GrantStatus::Approved,
            permissions,
            is_primary: false,
            active: true,
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn is_authoritative(&self) -> bool {
        self.status == GrantStatus::Approved && self.active
    }
}

/// Decides which guardians may receive an event class for a user
#[derive(Clone)]
pub struct PermissionGate {
    store: Arc<dyn GuardianRelationshipStore>,
    self_visible: HashSet<EventClass>,
}

impl PermissionGate {
    pub fn new(store: Arc<dyn GuardianRelationshipStore>) -> Self {
        Self {
            store,
            self_visible: HashSet::new(),
        }
    }

    /// Let a subject who is also their own guardian receive `class`
    pub fn allow_self_for(mut self, class: EventClass) -> Self {
        self.self_visible.insert(class);
        self
    }

    /// Guardians entitled to `class` events of `subject`, primary guardians first
    pub async fn guardians_for(
        &self,
        subject: PrincipalId,
        class: EventClass,
    ) -> Result<Vec<PrincipalId>, StorageError> {
        let required = Permission::required_for(class);
        let grants = self.store.grants_for(subject).await?;

        let mut entitled: Vec<&GuardianGrant> = grants
            .iter()
            .filter(|g| g.subject_user_id == subject)
            .filter(|g| g.is_authoritative())
            .filter(|g| g.permissions.allows(required))
            .filter(|g| g.guardian_id != subject || self.self_visible.contains(&class))
            .collect();

        // Stable: primaries first, otherwise store order
        entitled.sort_by_key(|g| !g.is_primary);

        let mut seen = HashSet::new();
        Ok(entitled
            .into_iter()
            .map(|g| g.guardian_id)
            .filter(|id| seen.insert(*id))
            .collect())
    }

    /// Whether `guardian` holds an authoritative primary grant over `subject`
    pub async fn is_primary(
        &self,
        guardian: PrincipalId,
        subject: PrincipalId,
    ) -> Result<bool, StorageError> {
        let grants = self.store.grants_for(subject).await?;
        Ok(grants.iter().any(|g| {
            g.guardian_id == guardian
                && g.subject_user_id == subject
                && g.is_authoritative()
                && g.is_primary
        }))
    }
}
