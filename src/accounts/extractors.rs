use axum::{
    async_trait,
    extract::{multipart::MultipartError, FromRequest, Multipart, Request},
    http::header,
    Json,
};

use crate::error::ApiError;

use super::dto::{AvatarUpload, RegisterRequest};

/// Registration payload from either `application/json` or
/// `multipart/form-data` with an optional `avatar` file field.
#[derive(Debug)]
pub struct RegisterSubmission {
    pub form: RegisterRequest,
    pub avatar: Option<AvatarUpload>,
}

#[async_trait]
impl<S> FromRequest<S> for RegisterSubmission
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            return from_multipart(multipart).await;
        }

        if content_type.starts_with("application/json") {
            let Json(form) = Json::<RegisterRequest>::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            return Ok(Self { form, avatar: None });
        }

        Err(ApiError::BadRequest(
            "Expected JSON or multipart form data".into(),
        ))
    }
}

async fn from_multipart(mut multipart: Multipart) -> Result<RegisterSubmission, ApiError> {
    let mut form = RegisterRequest::default();
    let mut avatar = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_field)? {
        let Some(name) = field.name().map(|s| s.to_string()) else {
            continue;
        };
        match name.as_str() {
            "name" => form.name = field.text().await.map_err(bad_field)?,
            "email" => form.email = field.text().await.map_err(bad_field)?,
            "password" => form.password = field.text().await.map_err(bad_field)?,
            "role" => form.role = Some(field.text().await.map_err(bad_field)?),
            "avatar" => {
                // Text fields named "avatar" are not uploads
                let Some(file_name) = field.file_name().map(|s| s.to_string()) else {
                    continue;
                };
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".into());
                let data = field.bytes().await.map_err(bad_field)?;
                avatar = Some(AvatarUpload {
                    file_name,
                    content_type,
                    data,
                });
            }
            _ => {}
        }
    }

    Ok(RegisterSubmission { form, avatar })
}

fn bad_field(err: MultipartError) -> ApiError {
    ApiError::BadRequest(err.to_string())
}
