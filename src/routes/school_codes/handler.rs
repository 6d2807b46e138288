use axum::extract::State;
use axum::{Extension, Json};
use chrono::Utc;

use crate::error::AppError;
use crate::middleware::auth::require_kid;
use crate::models::{MonitoringLevel, User, Verification};
use crate::utils::{calculate_age, sanitize_input};
use crate::AppState;

use super::model::{ValidateCodeRequest, ValidateCodeResponse};

/// Kid redeems a school code: single-use claim, school/grade land on the
/// profile, and the monitoring level is recomputed from the birth date.
pub async fn validate_code(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<ValidateCodeRequest>,
) -> Result<Json<ValidateCodeResponse>, AppError> {
    require_kid(&user)?;

    let input = sanitize_input(&req.code).to_uppercase();

    let now = Utc::now();
    let code = state
        .store
        .find_school_code(&input)
        .await?
        .ok_or_else(|| AppError::not_found("INVALID_CODE", "School code not found"))?;

    if code.expires_at < now {
        return Err(AppError::expired("CODE_EXPIRED", "School code has expired"));
    }
    if code.assigned_to.is_some() || !state.store.claim_school_code(&code.id, &user.id, now).await? {
        return Err(AppError::conflict("CODE_ALREADY_USED", "School code was already used"));
    }

    let mut profile = user.profile.clone();
    profile.school = Some(code.school_name.clone());
    profile.grade = Some(code.grade.clone());
    state.store.update_profile(&user.id, &profile).await?;

    let verification = Verification {
        parent_verified: user.verification.parent_verified,
        school_verified: true,
        verified_at: Some(now),
    };
    state.store.update_verification(&user.id, &verification).await?;

    let age = profile.date_of_birth.map(|dob| calculate_age(dob, now));
    let monitoring_level = MonitoringLevel::for_age(age);
    state.store.set_monitoring_level(&user.id, monitoring_level).await?;

    Ok(Json(ValidateCodeResponse {
        school_verified: true,
        school: code.school_name,
        grade: code.grade,
        monitoring_level,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Datelike, Duration, TimeZone};

    use crate::config::Config;
    use crate::models::{Profile, SchoolCode, UserType};
    use crate::store::MemoryStore;

    use super::*;

    fn state() -> AppState {
        AppState::new(Arc::new(MemoryStore::new()), Config::for_tests())
    }

    async fn seed_kid(state: &AppState, name: &str, birth_year: i32) -> User {
        let kid = User {
            id: format!("{name}-id"),
            email: format!("{name}@example.com"),
            user_type: UserType::Kid,
            profile: Profile {
                date_of_birth: Some(chrono::Utc.with_ymd_and_hms(birth_year, 1, 1, 0, 0, 0).unwrap()),
                ..Profile::default()
            },
            verification: Verification::default(),
            monitoring_level: MonitoringLevel::Full,
            parent_account: None,
            is_active: true,
            password_hash: "x".into(),
            last_login: None,
            created_at: Utc::now(),
        };
        state.store.insert_user(&kid).await.unwrap();
        kid
    }

    async fn seed_code(state: &AppState, code: &str, expires_in_days: i64) -> SchoolCode {
        let school_code = SchoolCode {
            id: format!("sc-{code}"),
            code: code.into(),
            school_name: "Riverdale Elementary".into(),
            grade: "5".into(),
            assigned_to: None,
            used_at: None,
            expires_at: Utc::now() + Duration::days(expires_in_days),
            is_active: true,
            created_at: Utc::now(),
        };
        state.store.insert_school_code(&school_code).await.unwrap();
        school_code
    }

    #[tokio::test]
    async fn older_kid_drops_to_partial_monitoring() {
        let state = state();
        let kid = seed_kid(&state, "theo", 2010).await;
        seed_code(&state, "ABCD23", 30).await;

        let Json(outcome) = validate_code(
            State(state.clone()),
            Extension(kid.clone()),
            Json(ValidateCodeRequest {
                code: "abcd23".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(outcome.monitoring_level, MonitoringLevel::Partial);
        assert_eq!(outcome.school, "Riverdale Elementary");

        let stored = state.store.find_user(&kid.id).await.unwrap().unwrap();
        assert!(stored.verification.school_verified);
        assert_eq!(stored.monitoring_level, MonitoringLevel::Partial);
        assert_eq!(stored.profile.grade.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn young_kid_stays_fully_monitored() {
        let state = state();
        let kid = seed_kid(&state, "mina", Utc::now().year() - 9).await;
        seed_code(&state, "EFGH45", 30).await;

        let Json(outcome) = validate_code(
            State(state),
            Extension(kid),
            Json(ValidateCodeRequest {
                code: "EFGH45".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(outcome.monitoring_level, MonitoringLevel::Full);
    }

    #[tokio::test]
    async fn codes_are_single_use() {
        let state = state();
        let first = seed_kid(&state, "mina", 2014).await;
        let second = seed_kid(&state, "theo", 2014).await;
        seed_code(&state, "JKLM67", 30).await;

        validate_code(
            State(state.clone()),
            Extension(first),
            Json(ValidateCodeRequest {
                code: "JKLM67".into(),
            }),
        )
        .await
        .unwrap();

        let err = validate_code(
            State(state),
            Extension(second),
            Json(ValidateCodeRequest {
                code: "JKLM67".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "CODE_ALREADY_USED");
    }

    #[tokio::test]
    async fn expired_codes_are_refused() {
        let state = state();
        let kid = seed_kid(&state, "mina", 2014).await;
        seed_code(&state, "NPQR89", -1).await;

        let err = validate_code(
            State(state),
            Extension(kid),
            Json(ValidateCodeRequest {
                code: "NPQR89".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "CODE_EXPIRED");
    }
}
