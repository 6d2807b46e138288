use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;

use crate::error::AppError;
use crate::models::{User, UserType};
use crate::utils::verify_token;
use crate::AppState;

/// Bearer-token guard for the protected route tree.  Resolves the token to a
/// live user and stashes it in request extensions for the handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(AppError::Unauthenticated)?;

    let claims =
        verify_token(bearer.token(), &state.config).map_err(|_| AppError::Unauthenticated)?;

    let user = state
        .store
        .find_user(&claims.sub)
        .await?
        .ok_or(AppError::Unauthenticated)?;

    // Deactivated accounts keep their tokens but lose access immediately.
    if !user.is_active {
        return Err(AppError::Unauthenticated);
    }

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

pub fn require_kid(user: &User) -> Result<(), AppError> {
    if user.user_type != UserType::Kid {
        return Err(AppError::forbidden(
            "INSUFFICIENT_PERMISSIONS",
            "Only kid accounts can do this",
        ));
    }
    Ok(())
}

pub fn require_parent(user: &User) -> Result<(), AppError> {
    if user.user_type != UserType::Parent {
        return Err(AppError::forbidden(
            "INSUFFICIENT_PERMISSIONS",
            "Only parent accounts can do this",
        ));
    }
    Ok(())
}
