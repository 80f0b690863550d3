use std::sync::Arc;

use anyhow::Context;
use lazy_static::lazy_static;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use crate::error::{ApiError, FieldError};

use super::dto::{ForgotPasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest};
use super::jwt::JwtKeys;
use super::password::{hash_password, verify_password};
use super::repo::{Account, AccountRepo, NewAccount, Role};

/// Reset tokens stay redeemable for one hour.
pub const RESET_TOKEN_TTL: Duration = Duration::hours(1);

const MIN_PASSWORD_CHARS: usize = 6;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn generate_reset_token() -> anyhow::Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate reset token")?;
    Ok(hex::encode(bytes))
}

/// Registration, login, and the two-phase credential reset. Handlers stay
/// thin; every rule lives here.
#[derive(Clone)]
pub struct CredentialService {
    repo: Arc<dyn AccountRepo>,
    keys: JwtKeys,
}

impl CredentialService {
    pub fn new(repo: Arc<dyn AccountRepo>, keys: JwtKeys) -> Self {
        Self { repo, keys }
    }

    /// Create an account. The password is hashed here, never by the store
    /// layer. The store's unique constraint is the authority on duplicate
    /// emails; the pre-insert lookup only produces the friendlier path.
    pub async fn register(
        &self,
        req: RegisterRequest,
        avatar_path: Option<String>,
    ) -> Result<Account, ApiError> {
        let mut violations = Vec::new();
        if req.name.is_empty() {
            violations.push(FieldError::new("name", "Name is required"));
        }
        if !is_valid_email(&req.email) {
            violations.push(FieldError::new("email", "Valid email is required"));
        }
        if req.password.chars().count() < MIN_PASSWORD_CHARS {
            violations.push(FieldError::new(
                "password",
                "Password must be at least 6 characters long",
            ));
        }
        let role = match req.role.as_deref() {
            None => Role::default(),
            Some(value) => match Role::parse(value) {
                Some(role) => role,
                None => {
                    violations.push(FieldError::new("role", "Role must be either user or admin"));
                    Role::default()
                }
            },
        };
        if !violations.is_empty() {
            return Err(ApiError::Validation(violations));
        }

        if self.repo.find_by_email(&req.email).await?.is_some() {
            warn!(email = %req.email, "registration with existing email");
            return Err(ApiError::DuplicateAccount);
        }

        let password_hash = hash_password(&req.password)?;
        let account = self
            .repo
            .insert(NewAccount {
                name: req.name,
                email: req.email,
                password_hash,
                role,
                avatar_path,
            })
            .await?;

        info!(account_id = %account.id, email = %account.email, "account registered");
        Ok(account)
    }

    /// Verify credentials and issue an auth token. Unknown email and wrong
    /// password are indistinguishable to the caller.
    pub async fn login(&self, req: LoginRequest) -> Result<String, ApiError> {
        let mut violations = Vec::new();
        if !is_valid_email(&req.email) {
            violations.push(FieldError::new("email", "Valid email is required"));
        }
        if req.password.is_empty() {
            violations.push(FieldError::new("password", "Password is required"));
        }
        if !violations.is_empty() {
            return Err(ApiError::Validation(violations));
        }

        let account = match self.repo.find_by_email(&req.email).await? {
            Some(account) => account,
            None => {
                warn!(email = %req.email, "login with unknown email");
                return Err(ApiError::InvalidCredentials);
            }
        };

        if !verify_password(&req.password, &account.password_hash)? {
            warn!(account_id = %account.id, "login with wrong password");
            return Err(ApiError::InvalidCredentials);
        }

        let token = self.keys.sign(account.id, &account.email)?;
        info!(account_id = %account.id, "login successful");
        Ok(token)
    }

    /// Issue a reset token valid for one hour, replacing any prior token.
    /// The token goes to the store only; it is never part of a response.
    pub async fn forgot_password(&self, req: ForgotPasswordRequest) -> Result<(), ApiError> {
        if !is_valid_email(&req.email) {
            return Err(ApiError::Validation(vec![FieldError::new(
                "email",
                "Valid email is required",
            )]));
        }

        let account = match self.repo.find_by_email(&req.email).await? {
            Some(account) => account,
            None => {
                warn!(email = %req.email, "forgot password for unknown email");
                return Err(ApiError::NotFound);
            }
        };

        let token = generate_reset_token()?;
        let expires_at = OffsetDateTime::now_utc() + RESET_TOKEN_TTL;
        self.repo
            .store_reset_token(account.id, &token, expires_at)
            .await?;

        // TODO: hand the token to the mailer once outbound delivery lands.
        info!(account_id = %account.id, "reset token issued");
        Ok(())
    }

    /// Redeem a reset token. The store consumes the token and swaps the hash
    /// in one step, so a token can never authorize two resets.
    pub async fn reset_password(&self, req: ResetPasswordRequest) -> Result<(), ApiError> {
        let mut violations = Vec::new();
        if req.reset_token.is_empty() {
            violations.push(FieldError::new("resetToken", "Reset token is required"));
        }
        if req.new_password.chars().count() < MIN_PASSWORD_CHARS {
            violations.push(FieldError::new(
                "newPassword",
                "Password must be at least 6 characters long",
            ));
        }
        if !violations.is_empty() {
            return Err(ApiError::Validation(violations));
        }

        let password_hash = hash_password(&req.new_password)?;
        let now = OffsetDateTime::now_utc();
        match self
            .repo
            .redeem_reset_token(&req.reset_token, now, &password_hash)
            .await?
        {
            Some(account) => {
                info!(account_id = %account.id, "password reset");
                Ok(())
            }
            None => {
                warn!("password reset with invalid or expired token");
                Err(ApiError::InvalidOrExpiredToken)
            }
        }
    }
}
