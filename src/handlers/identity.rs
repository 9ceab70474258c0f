//! Caller identity.
//!
//! Authentication happens upstream; the gateway in front of this service
//! forwards the authenticated user as `x-user-id` and, for staff, an
//! `x-user-role: ADMIN` header.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::services::order_query::Viewer;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const ADMIN_ROLE: &str = "ADMIN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub is_admin: bool,
}

impl CurrentUser {
    pub fn viewer(&self) -> Viewer {
        if self.is_admin {
            Viewer::Admin
        } else {
            Viewer::Shopper(self.user_id)
        }
    }

    fn from_parts(parts: &Parts) -> Result<Self, ServiceError> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing user identity".into()))?;
        let user_id = Uuid::parse_str(raw.trim())
            .map_err(|_| ServiceError::Unauthorized("malformed user identity".into()))?;

        let is_admin = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|role| role.trim().eq_ignore_ascii_case(ADMIN_ROLE));

        Ok(Self { user_id, is_admin })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_parts(parts)
    }
}

/// A caller carrying the admin role.
#[derive(Debug, Clone, Copy)]
pub struct AdminUser(pub CurrentUser);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_parts(parts)?;
        if !user.is_admin {
            return Err(ServiceError::Forbidden("admin role required".into()));
        }
        Ok(Self(user))
    }
}
