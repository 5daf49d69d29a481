//! Access Gate: membership-based authorization in front of every key
//! derivation.
//!
//! Grants come only from [`AccessGate::authorize`] (or, inside the crate, from
//! the gate's maintenance path used by rotation), and the lifecycle derives
//! group keys only from a grant, so no path reaches the cipher without passing
//! this check first.

use tracing::{debug, warn};

use crate::error::{Result, VaultError};
use crate::store::Directory;
use crate::types::{Capability, GroupId, PrincipalId, Role};

/// Why a request was refused. Logged internally, never shown to end users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    NotAMember,
    PrincipalBanned,
    GroupNotFound,
    /// The role exists but the policy does not allow the capability.
    InsufficientRole,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAMember => "NOT_A_MEMBER",
            Self::PrincipalBanned => "PRINCIPAL_BANNED",
            Self::GroupNotFound => "GROUP_NOT_FOUND",
            Self::InsufficientRole => "INSUFFICIENT_ROLE",
        }
    }
}

/// Authorization policy over the closed role set.
///
/// The permission model is flat: every member may read and write the group's
/// secrets. Membership administration and group deletion are decided by the
/// application, not here.
pub fn role_permits(role: Role, capability: Capability) -> bool {
    match (role, capability) {
        (Role::Owner | Role::Admin | Role::Member, Capability::Read) => true,
        (Role::Owner | Role::Admin | Role::Member, Capability::Write) => true,
    }
}

/// Proof that `principal` passed the gate for `group_id` and `capability`.
///
/// Maintenance grants (rotation, lazy re-encryption) carry no principal.
#[derive(Debug)]
pub struct AccessGrant {
    principal: Option<PrincipalId>,
    group_id: GroupId,
    capability: Capability,
    role: Option<Role>,
}

impl AccessGrant {
    pub fn principal(&self) -> Option<&PrincipalId> {
        self.principal.as_ref()
    }

    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// A write grant also covers reads of the same group.
    pub fn allows(&self, capability: Capability) -> bool {
        self.capability == capability || self.capability == Capability::Write
    }
}

pub struct AccessGate<D> {
    directory: D,
}

impl<D: Directory> AccessGate<D> {
    pub fn new(directory: D) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Evaluate the policy without turning a denial into an error.
    ///
    /// Check order: principal status, group existence, membership, policy.
    pub fn evaluate(
        &self,
        principal: &PrincipalId,
        group_id: &GroupId,
        capability: Capability,
    ) -> Result<std::result::Result<AccessGrant, DenyReason>> {
        if !self.directory.is_active_and_not_banned(principal)? {
            return Ok(Err(DenyReason::PrincipalBanned));
        }
        if self.directory.group(group_id)?.is_none() {
            return Ok(Err(DenyReason::GroupNotFound));
        }
        let Some(role) = self.directory.role(principal, group_id)? else {
            return Ok(Err(DenyReason::NotAMember));
        };
        if !role_permits(role, capability) {
            return Ok(Err(DenyReason::InsufficientRole));
        }
        Ok(Ok(AccessGrant {
            principal: Some(principal.clone()),
            group_id: group_id.clone(),
            capability,
            role: Some(role),
        }))
    }

    /// Write grant for maintenance work the vault does on its own behalf.
    /// The group must still exist.
    pub(crate) fn maintenance(&self, group_id: &GroupId) -> Result<AccessGrant> {
        if self.directory.group(group_id)?.is_none() {
            warn!(group_id = %group_id, "maintenance on unknown group refused");
            return Err(VaultError::AccessDenied(DenyReason::GroupNotFound));
        }
        Ok(AccessGrant {
            principal: None,
            group_id: group_id.clone(),
            capability: Capability::Write,
            role: None,
        })
    }

    /// Authorize a request, mapping a denial to [`VaultError::AccessDenied`].
    pub fn authorize(
        &self,
        principal: &PrincipalId,
        group_id: &GroupId,
        capability: Capability,
    ) -> Result<AccessGrant> {
        match self.evaluate(principal, group_id, capability)? {
            Ok(grant) => {
                debug!(
                    principal = %principal,
                    group_id = %group_id,
                    ?capability,
                    role = %role_label(grant.role),
                    "access granted"
                );
                Ok(grant)
            }
            Err(reason) => {
                warn!(
                    principal = %principal,
                    group_id = %group_id,
                    ?capability,
                    reason = reason.code(),
                    "access denied"
                );
                Err(VaultError::AccessDenied(reason))
            }
        }
    }
}

fn role_label(role: Option<Role>) -> &'static str {
    role.map(|r| r.as_str()).unwrap_or("none")
}
