//! Caller identity.
//!
//! Sign-in lives in an external identity provider; this service only verifies
//! the HS256 bearer tokens it issues and maps them to an [`Actor`]. A request
//! without an `Authorization` header is anonymous, a request with a bad token
//! is rejected.

use crate::{errors::ServiceError, AppState};
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::debug;
use uuid::Uuid;

pub const ADMIN_ROLE: &str = "admin";

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,        // Subject (user ID)
    pub roles: Vec<String>, // User's roles
    pub jti: String,        // JWT ID
    pub iat: i64,           // Issued at time
    pub exp: i64,           // Expiration time
    pub nbf: i64,           // Not valid before time
    pub iss: String,        // Issuer
    pub aud: String,        // Audience
}

/// Who is making the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Anonymous,
    Customer(Uuid),
    Admin(Uuid),
}

impl Actor {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Actor::Anonymous => None,
            Actor::Customer(id) | Actor::Admin(id) => Some(*id),
        }
    }

    /// The id of a user allowed to own a cart and place orders.
    /// Administrative accounts never shop.
    pub fn shopper_id(&self) -> Result<Uuid, ServiceError> {
        match self {
            Actor::Customer(id) => Ok(*id),
            Actor::Anonymous => Err(ServiceError::AuthenticationRequired),
            Actor::Admin(_) => Err(ServiceError::ForbiddenOperation(
                "administrative accounts cannot hold a cart".to_string(),
            )),
        }
    }

    pub fn require_admin(&self) -> Result<Uuid, ServiceError> {
        match self {
            Actor::Admin(id) => Ok(*id),
            Actor::Anonymous => Err(ServiceError::AuthenticationRequired),
            Actor::Customer(_) => Err(ServiceError::ForbiddenOperation(
                "administrator role required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub access_token_expiration: Duration,
}

impl AuthConfig {
    pub fn new(jwt_secret: String) -> Self {
        Self {
            jwt_secret,
            jwt_issuer: "storefront-api".to_string(),
            jwt_audience: "storefront".to_string(),
            access_token_expiration: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthService {
    config: AuthConfig,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues an access token. The identity provider normally does this; the
    /// service exposes it for operators and tests.
    pub fn issue_token(&self, user_id: Uuid, roles: &[&str]) -> Result<String, ServiceError> {
        let now = Utc::now();
        let exp = now
            + ChronoDuration::from_std(self.config.access_token_expiration)
                .map_err(|_| ServiceError::InternalError("Invalid token duration".to_string()))?;

        let claims = Claims {
            sub: user_id.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            nbf: now.timestamp(),
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| ServiceError::InternalError(format!("Failed to sign token: {}", e)))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);
        validation.set_audience(&[self.config.jwt_audience.as_str()]);

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| {
            debug!(error = %e, "Rejected bearer token");
            ServiceError::AuthenticationRequired
        })
    }

    pub fn actor_from_token(&self, token: &str) -> Result<Actor, ServiceError> {
        let claims = self.validate_token(token)?;
        let user_id =
            Uuid::parse_str(&claims.sub).map_err(|_| ServiceError::AuthenticationRequired)?;

        if claims.roles.iter().any(|r| r == ADMIN_ROLE) {
            Ok(Actor::Admin(user_id))
        } else {
            Ok(Actor::Customer(user_id))
        }
    }

    /// Resolves the actor from an optional `Authorization` header value.
    pub fn actor_from_header(&self, value: Option<&str>) -> Result<Actor, ServiceError> {
        match value {
            None => Ok(Actor::Anonymous),
            Some(value) => {
                let token = value
                    .strip_prefix("Bearer ")
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .ok_or(ServiceError::AuthenticationRequired)?;
                self.actor_from_token(token)
            }
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Actor {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header_value = match parts.headers.get(header::AUTHORIZATION) {
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|_| ServiceError::AuthenticationRequired)?,
            ),
            None => None,
        };
        state.auth.actor_from_header(header_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn service() -> AuthService {
        AuthService::new(AuthConfig::new(
            "test_secret_key_for_testing_purposes_only".to_string(),
        ))
    }

    #[test]
    fn customer_token_round_trip() {
        let auth = service();
        let user = Uuid::new_v4();
        let token = auth.issue_token(user, &[]).unwrap();

        assert_eq!(auth.actor_from_token(&token).unwrap(), Actor::Customer(user));
    }

    #[test]
    fn admin_role_yields_admin_actor() {
        let auth = service();
        let user = Uuid::new_v4();
        let token = auth.issue_token(user, &[ADMIN_ROLE]).unwrap();

        let actor = auth.actor_from_token(&token).unwrap();
        assert_eq!(actor, Actor::Admin(user));
        assert_matches!(actor.shopper_id(), Err(ServiceError::ForbiddenOperation(_)));
        assert_eq!(actor.require_admin().unwrap(), user);
    }

    #[test]
    fn missing_header_is_anonymous() {
        let actor = service().actor_from_header(None).unwrap();
        assert_eq!(actor, Actor::Anonymous);
        assert_matches!(actor.shopper_id(), Err(ServiceError::AuthenticationRequired));
        assert_matches!(actor.require_admin(), Err(ServiceError::AuthenticationRequired));
    }

    #[test]
    fn malformed_header_is_rejected() {
        let auth = service();
        assert_matches!(
            auth.actor_from_header(Some("Basic abc")),
            Err(ServiceError::AuthenticationRequired)
        );
        assert_matches!(
            auth.actor_from_header(Some("Bearer not-a-jwt")),
            Err(ServiceError::AuthenticationRequired)
        );
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let other = AuthService::new(AuthConfig::new(
            "another_secret_key_that_is_long_enough".to_string(),
        ));
        let token = other.issue_token(Uuid::new_v4(), &[]).unwrap();

        assert_matches!(
            service().actor_from_token(&token),
            Err(ServiceError::AuthenticationRequired)
        );
    }

    #[test]
    fn customer_cannot_act_as_admin() {
        let actor = Actor::Customer(Uuid::new_v4());
        assert_matches!(actor.require_admin(), Err(ServiceError::ForbiddenOperation(_)));
    }
}
