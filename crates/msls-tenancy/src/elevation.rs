//! Permission check for elevated (cross-tenant) sessions

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::resolver::Principal;

/// Role that is granted elevated sessions by default
pub const PLATFORM_ADMIN_ROLE: &str = "platform_admin";

/// Allowlist of subjects and roles that may open an elevated session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevationPolicy {
    actors: HashSet<String>,
    roles: HashSet<String>,
}

impl Default for ElevationPolicy {
    fn default() -> Self {
        Self::deny_all().allow_role(PLATFORM_ADMIN_ROLE)
    }
}

impl ElevationPolicy {
    #[must_use]
    pub fn deny_all() -> Self {
        Self {
            actors: HashSet::new(),
            roles: HashSet::new(),
        }
    }

    #[must_use]
    pub fn allow_actor(mut self, subject: impl Into<String>) -> Self {
        self.actors.insert(subject.into());
        self
    }

    #[must_use]
    pub fn allow_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn permits(&self, principal: &Principal) -> bool {
        !principal.subject.is_empty()
            && (self.actors.contains(&principal.subject)
                || principal.roles.iter().any(|r| self.roles.contains(r)))
    }

    /// Check `principal`, requiring a non-empty justification
    pub fn authorize(&self, principal: &Principal, reason: &str) -> Result<()> {
        if reason.trim().is_empty() {
            return Err(Error::ElevationDenied(format!(
                "{}: a reason is required",
                principal.subject
            )));
        }
        if self.permits(principal) {
            Ok(())
        } else {
            Err(Error::ElevationDenied(principal.subject.clone()))
        }
    }
}
