use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};
use std::str::FromStr;
use utoipa::ToSchema;

use crate::models::Id;

/// The only authorization axis: there are no finer-grained permissions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, ToSchema, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Manager,
    Admin,
}

impl Role {
    /// Managers and admins bypass the approval and lock gates.
    pub fn is_staff(self) -> bool {
        matches!(self, Role::Manager | Role::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Manager => "MANAGER",
            Role::Admin => "ADMIN",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USER" => Ok(Role::User),
            "MANAGER" => Ok(Role::Manager),
            "ADMIN" => Ok(Role::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub roles: Vec<Role>,
}

/// Identity of whoever is invoking a core operation.
///
/// Every service call takes one of these explicitly; nothing in the core
/// reads the identity from ambient request state. `banned` is resolved from
/// the user record at request time, not from the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Id,
    pub role: Role,
    pub ip: Option<String>,
    pub banned: bool,
}

impl Caller {
    pub fn new(user_id: Id, role: Role) -> Self {
        Self { user_id, role, ip: None, banned: false }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

fn jwt_secret() -> Result<String, jsonwebtoken::errors::Error> {
    env::var("JWT_SECRET").map_err(|_| jsonwebtoken::errors::ErrorKind::InvalidKeyFormat.into())
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let secret = jwt_secret()?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Extractor yielding validated `Claims`.
pub struct Auth(pub Claims);

impl Auth {
    /// Subjects are shaped `"<user id>:<username>"`.
    pub fn user_id(&self) -> Option<Id> {
        self.0.sub.split(':').next()?.parse().ok()
    }

    /// Highest role carried by the token (Admin > Manager > User).
    pub fn highest_role(&self) -> Role {
        self.0.roles.iter().copied().max().unwrap_or(Role::User)
    }
}

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        if let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() {
            return match decode_jwt(bearer.token()) {
                Ok(claims) => ready(Ok(Auth(claims))),
                Err(_) => ready(Err(actix_web::error::ErrorUnauthorized("Invalid JWT"))),
            };
        }
        ready(Err(actix_web::error::ErrorUnauthorized(
            "Authorization required",
        )))
    }
}

/// Role guard for anything holding a `role` field (usually a `Caller`).
/// Bails out of the enclosing function with `ServiceError::Forbidden`.
#[macro_export]
macro_rules! require_role {
    ($caller:expr, $role:pat) => {
        if !matches!($caller.role, $role) {
            return Err($crate::error::ServiceError::Forbidden(format!(
                "role {} may not perform this action",
                $caller.role
            ))
            .into());
        }
    };
}

/// Mint a JWT for a user. Used by the identity provider and by tests.
pub fn create_jwt(
    user_id: Id,
    username: &str,
    roles: Vec<Role>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let secret = jwt_secret()?;
    let expiration = (chrono::Utc::now() + chrono::Duration::hours(24)).timestamp() as usize;

    let claims = Claims {
        sub: format!("{}:{}", user_id, username),
        exp: expiration,
        roles,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Re-issue a token for the same subject with a fresh expiry.
pub fn refresh_jwt(claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
    let secret = jwt_secret()?;
    let refreshed = Claims {
        sub: claims.sub.clone(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(24)).timestamp() as usize,
        roles: claims.roles.clone(),
    };
    encode(&Header::default(), &refreshed, &EncodingKey::from_secret(secret.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering_puts_admin_highest() {
        let auth = Auth(Claims { sub: "7:x".into(), exp: usize::MAX, roles: vec![Role::Manager, Role::Admin, Role::User] });
        assert_eq!(auth.highest_role(), Role::Admin);
        assert_eq!(auth.user_id(), Some(7));
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("manager".parse::<Role>().unwrap(), Role::Manager);
        assert!("owner".parse::<Role>().is_err());
    }
}
