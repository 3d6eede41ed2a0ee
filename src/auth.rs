use axum::{async_trait, extract::FromRequestParts, http::request::Parts, RequestPartsExt};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use std::collections::BTreeSet;

use crate::{entity::Entity, error::ApiError, AppState};

/// The owner of an API token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
    pub is_superuser: bool,
    /// Permission codenames such as `learn.view_task`.
    pub permissions: BTreeSet<String>,
}

impl Principal {
    pub fn superuser(username: &str) -> Self {
        Self {
            username: username.into(),
            is_superuser: true,
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_permissions<'a>(
        username: &str,
        codenames: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            username: username.into(),
            is_superuser: false,
            permissions: codenames.into_iter().map(str::to_owned).collect(),
        }
    }

    pub fn has_perm(&self, codename: &str) -> bool {
        self.is_superuser || self.permissions.contains(codename)
    }
}

/// Whoever sent the request; `None` when no bearer token was given.
#[derive(Debug, Clone)]
pub struct Credentials(pub Option<Principal>);

#[async_trait]
impl FromRequestParts<AppState> for Credentials {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .extract::<Option<TypedHeader<Authorization<Bearer>>>>()
            .await
            .unwrap_or(None);

        let Some(TypedHeader(Authorization(bearer))) = header else {
            return Ok(Credentials(None));
        };

        match state.store.principal(bearer.token()).await? {
            Some(principal) => Ok(Credentials(Some(principal))),
            None => {
                tracing::debug!("rejected unknown api token");
                Err(ApiError::InvalidToken)
            }
        }
    }
}

/// Permission policy attached to a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Authenticated and holding the entity's view permission.
    ModelRead(Entity),
    /// Any authenticated caller.
    Authenticated,
}

impl Access {
    pub fn check<'a>(self, credentials: &'a Credentials) -> Result<&'a Principal, ApiError> {
        let principal = credentials.0.as_ref().ok_or(ApiError::Unauthenticated)?;
        match self {
            Access::Authenticated => Ok(principal),
            Access::ModelRead(entity) if principal.has_perm(entity.view_permission()) => {
                Ok(principal)
            }
            Access::ModelRead(entity) => {
                tracing::info!(user = %principal.username, ?entity, "read permission denied");
                Err(ApiError::Forbidden)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_callers_are_unauthenticated() {
        let err = Access::Authenticated.check(&Credentials(None)).unwrap_err();
        assert!(matches!(err, ApiError::Unauthenticated));
    }

    #[test]
    fn model_read_needs_the_entity_permission() {
        let creds = Credentials(Some(Principal::with_permissions(
            "analyst",
            ["learn.view_task"],
        )));
        assert!(Access::ModelRead(Entity::Task).check(&creds).is_ok());
        assert!(matches!(
            Access::ModelRead(Entity::Action).check(&creds),
            Err(ApiError::Forbidden)
        ));
        assert!(Access::Authenticated.check(&creds).is_ok());
    }

    #[test]
    fn superusers_read_everything() {
        let creds = Credentials(Some(Principal::superuser("root")));
        for entity in Entity::ALL {
            assert!(Access::ModelRead(entity).check(&creds).is_ok());
        }
    }
}
