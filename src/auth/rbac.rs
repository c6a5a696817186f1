/*!
 * # Role-Based Access Control
 *
 * Marketplace roles and the single authorization check used by the
 * services. Handlers never decide who may do what; the service operation
 * calls [`require_role`] itself so the rule holds no matter how it is
 * reached.
 */

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::warn;

use super::AuthUser;
use crate::errors::ServiceError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    /// Storefront customer; the auth service calls this role `user`
    #[default]
    #[serde(alias = "user")]
    #[strum(to_string = "buyer", serialize = "user")]
    Buyer,
    Seller,
    Admin,
}

/// Fails with `Forbidden` unless the principal holds one of `allowed`.
pub fn require_role(principal: &AuthUser, allowed: &[Role]) -> Result<(), ServiceError> {
    if allowed.contains(&principal.role) {
        return Ok(());
    }

    warn!(
        user_id = %principal.id,
        role = %principal.role,
        "principal lacks required role"
    );
    Err(ServiceError::Forbidden(
        "You don't have permission".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::str::FromStr;

    #[test]
    fn role_parses_auth_service_alias() {
        assert_eq!(Role::from_str("user").unwrap(), Role::Buyer);
        assert_eq!(Role::from_str("buyer").unwrap(), Role::Buyer);
        assert_eq!(Role::from_str("admin").unwrap(), Role::Admin);
        assert!(Role::from_str("superuser").is_err());
        assert_eq!(Role::Seller.to_string(), "seller");
    }

    #[test]
    fn require_role_allows_listed_roles_only() {
        let seller = AuthUser::new("s1", Role::Seller);
        assert!(require_role(&seller, &[Role::Seller, Role::Admin]).is_ok());
        assert_matches!(
            require_role(&seller, &[Role::Admin]),
            Err(ServiceError::Forbidden(_))
        );
    }
}
