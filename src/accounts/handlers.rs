use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use tracing::{instrument, warn};

use crate::{
    avatars::{self, MAX_AVATAR_BYTES},
    error::ApiError,
    state::AppState,
};

use super::{
    dto::{
        AccountView, ForgotPasswordRequest, LoginRequest, LoginResponse, MessageResponse,
        RegisterResponse, ResetPasswordRequest,
    },
    extractors::RegisterSubmission,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
        // headroom above the avatar cap for the text fields
        .layer(DefaultBodyLimit::max(MAX_AVATAR_BYTES + 64 * 1024))
}

#[instrument(skip(state, submission))]
pub async fn register(
    State(state): State<AppState>,
    submission: RegisterSubmission,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let stored = match &submission.avatar {
        Some(upload) => Some(avatars::store_avatar(state.avatars.as_ref(), upload).await?),
        None => None,
    };
    let avatar_path = stored.as_ref().map(|s| s.path.clone());

    let account = match state.service.register(submission.form, avatar_path).await {
        Ok(account) => account,
        Err(err) => {
            if let Some(stored) = stored {
                if let Err(cleanup) = state.avatars.remove(&stored.file_name).await {
                    warn!(error = %cleanup, file = %stored.file_name, "orphan avatar not removed");
                }
            }
            return Err(err);
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".into(),
            user: AccountView::from(account),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Some(Json(req)) = payload else {
        return Err(ApiError::BadRequest("Missing or malformed JSON body".into()));
    };
    let token = state.service.login(req).await?;
    Ok(Json(LoginResponse {
        message: "Login successful".into(),
        token,
    }))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Some(Json(req)) = payload else {
        return Err(ApiError::BadRequest("Missing or malformed JSON body".into()));
    };
    state.service.forgot_password(req).await?;
    Ok(Json(MessageResponse {
        message: "Reset token sent to email".into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Some(Json(req)) = payload else {
        return Err(ApiError::BadRequest("Missing or malformed JSON body".into()));
    };
    state.service.reset_password(req).await?;
    Ok(Json(MessageResponse {
        message: "Password has been reset successfully".into(),
    }))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::accounts::dto::{AvatarUpload, RegisterRequest};

    use super::*;

    fn submission(name: &str, email: &str, password: &str) -> RegisterSubmission {
        RegisterSubmission {
            form: RegisterRequest {
                name: name.into(),
                email: email.into(),
                password: password.into(),
                role: None,
            },
            avatar: None,
        }
    }

    #[tokio::test]
    async fn register_returns_created_with_public_view() {
        let state = AppState::fake();
        let (status, Json(body)) = register(
            State(state),
            submission("Ada", "ada@example.com", "secret1"),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body.message, "User registered successfully");
        assert_eq!(body.user.email, "ada@example.com");
    }

    #[tokio::test]
    async fn register_persists_avatar_path() {
        let state = AppState::fake();
        let mut sub = submission("Ada", "ada@example.com", "secret1");
        sub.avatar = Some(AvatarUpload {
            file_name: "me.png".into(),
            content_type: "image/png".into(),
            data: Bytes::from_static(b"PNGDATA"),
        });
        let (_, Json(body)) = register(State(state), sub).await.unwrap();
        let path = body.user.avatar_path.expect("avatar path recorded");
        assert!(path.starts_with("/avatar/"));
        assert!(path.ends_with(".png"));
    }

    #[tokio::test]
    async fn login_without_payload_is_bad_request() {
        let state = AppState::fake();
        let err = login(State(state), None).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn handlers_cover_the_full_flow() {
        let state = AppState::fake();
        register(
            State(state.clone()),
            submission("Ada", "ada@example.com", "secret1"),
        )
        .await
        .unwrap();

        let Json(login_body) = login(
            State(state.clone()),
            Some(Json(LoginRequest {
                email: "ada@example.com".into(),
                password: "secret1".into(),
            })),
        )
        .await
        .unwrap();
        assert_eq!(login_body.message, "Login successful");
        assert!(!login_body.token.is_empty());

        let Json(forgot_body) = forgot_password(
            State(state.clone()),
            Some(Json(ForgotPasswordRequest {
                email: "ada@example.com".into(),
            })),
        )
        .await
        .unwrap();
        assert_eq!(forgot_body.message, "Reset token sent to email");

        let err = reset_password(
            State(state),
            Some(Json(ResetPasswordRequest {
                reset_token: "not-the-token".into(),
                new_password: "newpass1".into(),
            })),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidOrExpiredToken));
    }
}
