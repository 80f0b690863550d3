use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

/// Fixed validity window for issued tokens.
pub const TOKEN_TTL: Duration = Duration::days(3);

/// Claims carried by every issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub iat: usize,
    pub exp: usize,
}

/// HS256 signing and verification keys derived from the configured secret.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn sign(&self, account_id: Uuid, email: &str) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TOKEN_TTL;
        let claims = Claims {
            sub: account_id,
            email: email.to_string(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(account_id = %account_id, "jwt signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())?;
        debug!(account_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_and_verify_roundtrip() {
        let keys = JwtKeys::new("dev-secret");
        let account_id = Uuid::new_v4();
        let token = keys.sign(account_id, "user@example.com").expect("sign");
        let claims = keys.verify(&token).expect("verify");
        assert_eq!(claims.sub, account_id);
        assert_eq!(claims.email, "user@example.com");
    }

    #[tokio::test]
    async fn token_is_valid_for_three_days() {
        let keys = JwtKeys::new("dev-secret");
        let token = keys.sign(Uuid::new_v4(), "user@example.com").expect("sign");
        let claims = keys.verify(&token).expect("verify");
        assert_eq!(
            claims.exp - claims.iat,
            TOKEN_TTL.whole_seconds() as usize
        );
    }

    #[tokio::test]
    async fn verify_rejects_wrong_secret() {
        let keys = JwtKeys::new("dev-secret");
        let other = JwtKeys::new("other-secret");
        let token = keys.sign(Uuid::new_v4(), "user@example.com").expect("sign");
        assert!(other.verify(&token).is_err());
    }

    #[tokio::test]
    async fn verify_rejects_garbage() {
        let keys = JwtKeys::new("dev-secret");
        assert!(keys.verify("not-a-token").is_err());
    }
}
