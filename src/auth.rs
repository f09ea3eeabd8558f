use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

/// The two principal roles the identity provider issues. Everything the core
/// reads or writes is scoped through one of them (see `scope.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Landlord,
    Tenant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Landlord => "landlord",
            Self::Tenant => "tenant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "landlord" => Some(Self::Landlord),
            "tenant" => Some(Self::Tenant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    role: Role,
    #[allow(dead_code)]
    exp: usize,
}

/// Resolve the calling principal from the request headers.
///
/// Session issuance happens outside this service; we only verify the bearer
/// token and extract `{identity id, role}` from it.
pub fn require_user(state: &AppState, headers: &HeaderMap) -> Result<AuthUser, AppError> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(user) = dev_override_user(headers) {
            return Ok(user);
        }
    }

    let token = bearer_token(headers).ok_or_else(|| {
        AppError::Unauthorized("Authentication required.".to_string())
    })?;

    let secret = state.config.jwt_secret.as_deref().ok_or_else(|| {
        AppError::Dependency("JWT_SECRET is not configured.".to_string())
    })?;

    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|_| AppError::Unauthorized("Invalid or expired token.".to_string()))?;

    if decoded.claims.sub.trim().is_empty() {
        return Err(AppError::Unauthorized("Token is missing a subject.".to_string()));
    }

    Ok(AuthUser {
        id: decoded.claims.sub,
        role: decoded.claims.role,
    })
}

pub fn require_role(user: &AuthUser, role: Role) -> Result<(), AppError> {
    if user.role == role {
        return Ok(());
    }
    Err(AppError::Forbidden(format!(
        "Access restricted to {}s only.",
        role.as_str()
    )))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn dev_override_user(headers: &HeaderMap) -> Option<AuthUser> {
    let id = headers.get("x-user-id")?.to_str().ok()?.trim().to_string();
    if id.is_empty() {
        return None;
    }
    let role = headers
        .get("x-user-role")
        .and_then(|value| value.to_str().ok())
        .and_then(Role::parse)
        .unwrap_or(Role::Landlord);
    Some(AuthUser { id, role })
}

#[cfg(test)]
mod tests {
    use super::{bearer_token, Role};
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn parses_roles() {
        assert_eq!(Role::parse("landlord"), Some(Role::Landlord));
        assert_eq!(Role::parse(" Tenant "), Some(Role::Tenant));
        assert_eq!(Role::parse("admin"), None);
    }

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Basic xyz"),
        );
        assert_eq!(bearer_token(&headers), None);
    }
}
