//! Role-based permission checks. Pure functions over the viewer's role and
//! resource ownership; every caller passes the viewer explicitly.

use crate::db::models::Role;
use crate::extractors::CurrentUser;

/// Admins (including the owner) may delete anything; everyone may delete
/// what they own.
pub fn can_delete(actor: &CurrentUser, resource_owner_id: &str) -> bool {
    actor.role.is_admin() || actor.id == resource_owner_id
}

/// Only the owner may grant the admin role.
pub fn can_promote_to_admin(actor: &CurrentUser) -> bool {
    actor.role.is_owner()
}

/// Only the owner may manage the admin roster.
pub fn can_manage_admins(actor: &CurrentUser) -> bool {
    actor.role.is_owner()
}

/// The owner role is assigned at provisioning time only and never changes
/// through role mutation. Targeting an owner is a validation error, not a
/// permission error.
pub fn role_is_mutable(target_role: Role) -> bool {
    !target_role.is_owner()
}
