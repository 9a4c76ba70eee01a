use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
};
use tracing::{error, warn};
use uuid::Uuid;

use super::{
    claims::{Claims, TokenKind},
    keys::{issued_at, JwtKeys},
};
use crate::credentials::{CredentialError, Identity};
use crate::state::AppState;

/// Authenticated caller: a valid access token for an active credential whose
/// password has not changed since the token was issued.
pub struct AuthUser {
    pub id: Uuid,
    pub identity: Identity,
}

/// Rejects tokens that predate the last password change or belong to a
/// deactivated credential.
pub(crate) async fn ensure_current(
    state: &AppState,
    claims: &Claims,
) -> Result<(), (StatusCode, String)> {
    let iat = issued_at(claims)
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid or expired token".to_string()))?;
    match state
        .credentials
        .token_issued_before_change(&claims.email, iat)
        .await
    {
        Ok(false) => Ok(()),
        Ok(true) => {
            warn!(credential_id = %claims.sub, "token issued before password change");
            Err((
                StatusCode::UNAUTHORIZED,
                "Password changed, please log in again".to_string(),
            ))
        }
        Err(CredentialError::NotFound) => {
            warn!(credential_id = %claims.sub, "token for unknown or inactive credential");
            Err((StatusCode::UNAUTHORIZED, "Invalid or expired token".to_string()))
        }
        Err(e) => {
            error!(error = %e, "stale token check failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            ))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);

        // Read Authorization header
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or((
                StatusCode::UNAUTHORIZED,
                "Missing Authorization header".to_string(),
            ))?;

        // Expect "Bearer <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or((
                StatusCode::UNAUTHORIZED,
                "Invalid Authorization header".to_string(),
            ))?;

        let claims = keys.verify(token).map_err(|_| {
            warn!("invalid or expired token");
            (
                StatusCode::UNAUTHORIZED,
                "Invalid or expired token".to_string(),
            )
        })?;

        if claims.kind != TokenKind::Access {
            return Err((
                StatusCode::UNAUTHORIZED,
                "Access token required".to_string(),
            ));
        }

        ensure_current(state, &claims).await?;

        Ok(AuthUser {
            id: claims.sub,
            identity: claims.email,
        })
    }
}
