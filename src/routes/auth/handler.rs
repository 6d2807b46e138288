use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::config::limits;
use crate::error::AppError;
use crate::middleware::auth::require_parent;
use crate::models::{LoginCode, MonitoringLevel, Profile, User, UserType, Verification};
use crate::utils::{
    generate_code, generate_code_login_token, generate_token, hash_password, sanitize_input,
    verify_password,
};
use crate::AppState;

use super::model::{
    AuthResponse, LoginCodeRequest, LoginCodeResponse, LoginRequest, LoginWithCodeRequest,
    RegisterRequest, UserPayload,
};

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let email = sanitize_input(&req.email).to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::validation("INVALID_EMAIL", "A valid email is required"));
    }
    if req.password.len() < limits::MIN_PASSWORD_LEN {
        return Err(AppError::validation(
            "PASSWORD_TOO_SHORT",
            format!("Password must be at least {} characters", limits::MIN_PASSWORD_LEN),
        ));
    }
    let user_type = UserType::parse(&req.user_type)
        .ok_or_else(|| AppError::validation("INVALID_USER_TYPE", "userType must be kid or parent"))?;

    if state.store.find_user_by_email(&email).await?.is_some() {
        return Err(AppError::conflict("USER_EXISTS", "An account with this email already exists"));
    }

    let first_name = req.first_name.as_deref().map(sanitize_input).filter(|s| !s.is_empty());
    let last_name = req.last_name.as_deref().map(sanitize_input).filter(|s| !s.is_empty());
    let display_name = req
        .display_name
        .as_deref()
        .map(sanitize_input)
        .filter(|s| !s.is_empty())
        .or_else(|| match (&first_name, &last_name) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            _ => None,
        });

    let user = User {
        id: Uuid::new_v4().to_string(),
        email,
        user_type,
        profile: Profile {
            display_name,
            first_name,
            last_name,
            date_of_birth: req.date_of_birth,
            ..Profile::default()
        },
        verification: Verification::default(),
        // New kids start fully monitored until a school code says otherwise.
        monitoring_level: MonitoringLevel::Full,
        parent_account: None,
        is_active: true,
        password_hash: hash_password(&req.password)?,
        last_login: None,
        created_at: Utc::now(),
    };

    state.store.insert_user(&user).await?;

    let token = generate_token(&user.id, &state.config)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: UserPayload::of(user),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let email = sanitize_input(&req.email).to_lowercase();

    // One error for every failure shape; no account probing.
    let invalid = || AppError::validation("INVALID_CREDENTIALS", "Invalid email or password");

    let mut user = state
        .store
        .find_user_by_email(&email)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(invalid)?;

    if !verify_password(&req.password, &user.password_hash)? {
        return Err(invalid());
    }

    let now = Utc::now();
    state.store.set_last_login(&user.id, now).await?;
    user.last_login = Some(now);

    let token = generate_token(&user.id, &state.config)?;
    Ok(Json(AuthResponse {
        token,
        user: UserPayload::of(user),
    }))
}

pub async fn me(Extension(user): Extension<User>) -> Json<UserPayload> {
    Json(UserPayload::of(user))
}

/// Parent mints a short-lived login code for a linked child device.
pub async fn create_login_code(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<LoginCodeRequest>,
) -> Result<Json<LoginCodeResponse>, AppError> {
    require_parent(&user)?;

    if !state.store.is_parent_of(&user.id, &req.child_id).await? {
        return Err(AppError::forbidden("NOT_YOUR_CHILD", "No link to this child"));
    }

    let now = Utc::now();

    // Re-requesting within the window returns the same code.
    if let Some(existing) = state.store.find_login_code_for(&req.child_id).await? {
        if !existing.used && existing.expires_at > now {
            return Ok(Json(LoginCodeResponse {
                code: existing.code,
                expires_at: existing.expires_at,
            }));
        }
    }

    let code = LoginCode {
        code: generate_code(limits::LOGIN_CODE_LEN),
        child_id: req.child_id,
        parent_id: user.id.clone(),
        expires_at: now + Duration::minutes(limits::LOGIN_CODE_EXPIRY_MINUTES),
        used: false,
        created_at: now,
    };
    state.store.upsert_login_code(&code).await?;

    Ok(Json(LoginCodeResponse {
        code: code.code,
        expires_at: code.expires_at,
    }))
}

pub async fn login_with_code(
    State(state): State<AppState>,
    Json(req): Json<LoginWithCodeRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let input = sanitize_input(&req.code).to_uppercase();

    let code = state
        .store
        .find_login_code(&input)
        .await?
        .ok_or_else(|| AppError::not_found("INVALID_CODE", "Login code not found"))?;

    if code.expires_at < Utc::now() {
        return Err(AppError::expired("CODE_EXPIRED", "Login code has expired"));
    }
    // Conditional claim; a second exchange of the same code loses.
    if code.used || !state.store.consume_login_code(&input).await? {
        return Err(AppError::conflict("CODE_ALREADY_USED", "Login code was already used"));
    }

    let mut user = state
        .store
        .find_user(&code.child_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::not_found("USER_NOT_FOUND", "Account not found"))?;

    let now = Utc::now();
    state.store.set_last_login(&user.id, now).await?;
    user.last_login = Some(now);

    let token = generate_code_login_token(&user.id, &state.config)?;
    Ok(Json(AuthResponse {
        token,
        user: UserPayload::of(user),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::Config;
    use crate::store::MemoryStore;

    use super::*;

    fn state() -> AppState {
        AppState::new(Arc::new(MemoryStore::new()), Config::for_tests())
    }

    fn register_req(email: &str, user_type: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: "hunter2-secure".into(),
            user_type: user_type.into(),
            first_name: Some("Sam".into()),
            last_name: Some("Rivera".into()),
            display_name: None,
            date_of_birth: None,
        }
    }

    #[tokio::test]
    async fn register_then_login_roundtrip() {
        let state = state();
        let (status, Json(created)) =
            register(State(state.clone()), Json(register_req("kid@example.com", "kid")))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.user.user.profile.display_name.as_deref(), Some("Sam Rivera"));
        assert!(!created.user.is_fully_verified);

        let Json(logged_in) = login(
            State(state),
            Json(LoginRequest {
                email: "KID@example.com".into(),
                password: "hunter2-secure".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(logged_in.user.user.email, "kid@example.com");
        assert!(logged_in.user.user.last_login.is_some());
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let state = state();
        register(State(state.clone()), Json(register_req("kid@example.com", "kid")))
            .await
            .unwrap();

        let err = register(State(state), Json(register_req("kid@example.com", "kid")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "USER_EXISTS");
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let state = state();
        register(State(state.clone()), Json(register_req("kid@example.com", "kid")))
            .await
            .unwrap();

        let err = login(
            State(state),
            Json(LoginRequest {
                email: "kid@example.com".into(),
                password: "not-the-password".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_CREDENTIALS");
    }

    #[tokio::test]
    async fn login_code_is_single_use() {
        let state = state();
        let (_, Json(parent)) =
            register(State(state.clone()), Json(register_req("parent@example.com", "parent")))
                .await
                .unwrap();
        let (_, Json(kid)) =
            register(State(state.clone()), Json(register_req("kid@example.com", "kid")))
                .await
                .unwrap();

        state
            .store
            .upsert_parent_child(&parent.user.user.id, &kid.user.user.id)
            .await
            .unwrap();

        let Json(minted) = create_login_code(
            State(state.clone()),
            Extension(parent.user.user.clone()),
            Json(LoginCodeRequest {
                child_id: kid.user.user.id.clone(),
            }),
        )
        .await
        .unwrap();

        // Re-minting inside the window is idempotent.
        let Json(again) = create_login_code(
            State(state.clone()),
            Extension(parent.user.user.clone()),
            Json(LoginCodeRequest {
                child_id: kid.user.user.id.clone(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(minted.code, again.code);

        let Json(session) = login_with_code(
            State(state.clone()),
            Json(LoginWithCodeRequest {
                code: minted.code.clone(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(session.user.user.id, kid.user.user.id);

        let err = login_with_code(State(state), Json(LoginWithCodeRequest { code: minted.code }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CODE_ALREADY_USED");
    }

    #[tokio::test]
    async fn login_code_requires_parent_link() {
        let state = state();
        let (_, Json(parent)) =
            register(State(state.clone()), Json(register_req("parent@example.com", "parent")))
                .await
                .unwrap();
        let (_, Json(kid)) =
            register(State(state.clone()), Json(register_req("kid@example.com", "kid")))
                .await
                .unwrap();

        let err = create_login_code(
            State(state),
            Extension(parent.user.user),
            Json(LoginCodeRequest {
                child_id: kid.user.user.id,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "NOT_YOUR_CHILD");
    }
}
