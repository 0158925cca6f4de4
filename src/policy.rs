//! Ownership rules.
//!
//! Only the owner of a resource may change or delete it. Roles play no part.

use crate::error::{Result, ServerError};
use crate::token::Identity;

/// A resource with a single owner.
pub trait Owned {
    fn owner_id(&self) -> &str;
}

/// Whether `identity` may update or delete `resource`.
///
/// A plain comparison. Identities with an empty id never get this far:
/// token verification refuses them.
pub fn can_mutate(identity: &Identity, resource: &impl Owned) -> bool {
    identity.user_id == resource.owner_id()
}

/// Same as [`can_mutate`], as an error.
pub fn authorize(identity: &Identity, resource: &impl Owned) -> Result<()> {
    if can_mutate(identity, resource) {
        Ok(())
    } else {
        tracing::debug!(user_id = %identity.user_id, owner = %resource.owner_id(), "ownership check failed");
        Err(ServerError::Forbidden)
    }
}
