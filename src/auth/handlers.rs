use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest,
            MessageResponse, PublicUser, RefreshRequest, RegisterRequest, ResetPasswordRequest,
        },
        extractors::{ensure_current, AuthUser},
        keys::JwtKeys,
    },
    credentials::{CredentialError, CredentialRecord, Identity, ResetToken, StoreError},
    state::AppState,
};

type ApiError = (StatusCode, String);

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/change-password", post(change_password))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me).delete(delete_me))
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    error!(error = %e, "internal error");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".into())
}

/// Maps lifecycle failures onto HTTP. Every `NotFound` cause of one endpoint
/// shares the single `not_found` response.
fn credential_error(e: CredentialError, not_found: ApiError) -> ApiError {
    if e.is_infrastructure() {
        return internal(e);
    }
    match e {
        CredentialError::NotFound => not_found,
        CredentialError::Expired => (StatusCode::BAD_REQUEST, "Reset token expired".into()),
        CredentialError::Validation(v) => (StatusCode::BAD_REQUEST, v.to_string()),
        CredentialError::Store(StoreError::Conflict) => {
            (StatusCode::CONFLICT, "Email already registered".into())
        }
        other => internal(other),
    }
}

fn invalid_credentials() -> ApiError {
    (StatusCode::UNAUTHORIZED, "Invalid credentials".into())
}

fn invalid_reset_token() -> ApiError {
    (StatusCode::BAD_REQUEST, "Invalid reset token".into())
}

fn parse_identity(raw: &str) -> Result<Identity, ApiError> {
    Identity::parse(raw).map_err(|_| {
        warn!("invalid email");
        (StatusCode::BAD_REQUEST, "Invalid email".into())
    })
}

fn ensure_confirmed(password: &str, confirm: &str) -> Result<(), ApiError> {
    if password != confirm {
        warn!("password confirmation mismatch");
        return Err((StatusCode::BAD_REQUEST, "Passwords are not the same".into()));
    }
    Ok(())
}

fn issue_tokens(state: &AppState, record: &CredentialRecord) -> Result<AuthResponse, ApiError> {
    let keys = JwtKeys::from_ref(state);
    let now = state.clock.now();
    let access_token = keys.sign_access(record, now).map_err(internal)?;
    let refresh_token = keys.sign_refresh(record, now).map_err(internal)?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: PublicUser::from(record),
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let identity = parse_identity(&payload.email)?;
    ensure_confirmed(&payload.password, &payload.password_confirm)?;

    let record = state
        .credentials
        .register(&identity, &payload.password)
        .await
        .map_err(|e| credential_error(e, invalid_credentials()))?;

    info!(credential_id = %record.id, email = %record.identity, "user registered");
    Ok((StatusCode::CREATED, Json(issue_tokens(&state, &record)?)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let identity = parse_identity(&payload.email)?;

    let ok = state
        .credentials
        .verify_password(&identity, &payload.password)
        .await
        .map_err(|e| credential_error(e, invalid_credentials()))?;
    if !ok {
        warn!(email = %identity, "login rejected");
        return Err(invalid_credentials());
    }

    let record = state
        .credentials
        .find(&identity)
        .await
        .map_err(|e| credential_error(e, invalid_credentials()))?;

    info!(credential_id = %record.id, email = %record.identity, "user logged in");
    Ok(Json(issue_tokens(&state, &record)?))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify_refresh(&payload.refresh_token)
        .map_err(|_| {
            warn!("invalid or expired refresh token");
            (StatusCode::UNAUTHORIZED, "Invalid or expired token".to_string())
        })?;
    ensure_current(&state, &claims).await?;

    let record = state
        .credentials
        .find(&claims.email)
        .await
        .map_err(|e| credential_error(e, (StatusCode::UNAUTHORIZED, "User not found".into())))?;
    Ok(Json(issue_tokens(&state, &record)?))
}

/// Always answers 202 so the response does not reveal whether the email exists.
#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let accepted = (
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "If the account exists, a reset link has been sent",
        }),
    );
    let Ok(identity) = Identity::parse(&payload.email) else {
        return Ok(accepted);
    };

    match state.credentials.request_reset(&identity).await {
        Ok(issued) => {
            // Same answer on failure: a 500 here would confirm the account exists.
            if let Err(e) = state
                .delivery
                .deliver(&identity, &issued.token, issued.expires_at)
                .await
            {
                error!(error = %e, "reset token delivery failed");
            }
        }
        Err(CredentialError::NotFound) => {
            info!("reset requested for unknown identity");
        }
        Err(e) => return Err(internal(e)),
    }
    Ok(accepted)
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    ensure_confirmed(&payload.password, &payload.password_confirm)?;
    let token = ResetToken::new(payload.token);

    let record = state
        .credentials
        .confirm_reset(&token, &payload.password)
        .await
        .map_err(|e| credential_error(e, invalid_reset_token()))?;

    info!(credential_id = %record.id, "password reset via token");
    Ok(Json(issue_tokens(&state, &record)?))
}

#[instrument(skip(state, user, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    ensure_confirmed(&payload.password, &payload.password_confirm)?;

    let record = state
        .credentials
        .change_password(&user.identity, &payload.current_password, &payload.password)
        .await
        .map_err(|e| credential_error(e, invalid_credentials()))?;

    info!(credential_id = %record.id, "password changed");
    Ok(Json(issue_tokens(&state, &record)?))
}

#[instrument(skip(state, user))]
pub async fn get_me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<PublicUser>, ApiError> {
    let record = state
        .credentials
        .find(&user.identity)
        .await
        .map_err(|e| credential_error(e, (StatusCode::UNAUTHORIZED, "User not found".into())))?;
    Ok(Json(PublicUser::from(&record)))
}

#[instrument(skip(state, user))]
pub async fn delete_me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<StatusCode, ApiError> {
    state
        .credentials
        .deactivate(&user.identity)
        .await
        .map_err(|e| credential_error(e, (StatusCode::UNAUTHORIZED, "User not found".into())))?;
    info!(credential_id = %user.id, "user deactivated");
    Ok(StatusCode::NO_CONTENT)
}
