use axum::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// Account role as stored in the `account_role` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

/// A stored account. Credential material never serializes.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub avatar_path: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token_expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Fields required to insert an account. The hash is computed by the caller.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub avatar_path: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("account already exists")]
    Duplicate,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Store operations the credential service needs. The store is the authority
/// for email uniqueness and for reset-token redemption races.
#[async_trait]
pub trait AccountRepo: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, RepoError>;

    async fn insert(&self, new: NewAccount) -> Result<Account, RepoError>;

    async fn store_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), RepoError>;

    /// Atomically consume an unexpired reset token, storing the new hash and
    /// clearing the token. Returns `None` when no row matched.
    async fn redeem_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
        new_hash: &str,
    ) -> Result<Option<Account>, RepoError>;
}

#[derive(Clone)]
pub struct PgAccountRepo {
    pool: PgPool,
}

impl PgAccountRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepo for PgAccountRepo {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, RepoError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, name, email, password_hash, role, avatar_path,
                   reset_token, reset_token_expires_at, created_at, updated_at
            FROM accounts
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn insert(&self, new: NewAccount) -> Result<Account, RepoError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (name, email, password_hash, role, avatar_path)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, email, password_hash, role, avatar_path,
                      reset_token, reset_token_expires_at, created_at, updated_at
            "#,
        )
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(new.role)
        .bind(&new.avatar_path)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepoError::Duplicate
            } else {
                RepoError::Database(e)
            }
        })?;
        Ok(account)
    }

    async fn store_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET reset_token = $2, reset_token_expires_at = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn redeem_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
        new_hash: &str,
    ) -> Result<Option<Account>, RepoError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET password_hash = $3, reset_token = NULL,
                reset_token_expires_at = NULL, updated_at = now()
            WHERE reset_token = $1 AND reset_token_expires_at > $2
            RETURNING id, name, email, password_hash, role, avatar_path,
                      reset_token, reset_token_expires_at, created_at, updated_at
            "#,
        )
        .bind(token)
        .bind(now)
        .bind(new_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}


#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    use sqlx::error::{DatabaseError, ErrorKind};
    use time::Duration;

    use super::memory::MemoryAccountRepo;
    use super::*;

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
        }));
        assert!(!is_unique_violation(&err));

        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn role_parses_known_values_only() {
        assert_eq!(Role::parse("user"), Some(Role::User));
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("root"), None);
        assert_eq!(Role::parse("Admin"), None);
    }

    #[test]
    fn account_serialization_excludes_credentials() {
        let now = OffsetDateTime::now_utc();
        let account = Account {
            id: Uuid::new_v4(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password_hash: "$argon2id$secret".into(),
            role: Role::User,
            avatar_path: None,
            reset_token: Some("deadbeef".into()),
            reset_token_expires_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&account).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("reset_token").is_none());
        assert!(json.get("reset_token_expires_at").is_none());
        assert_eq!(json["email"], "ada@example.com");
    }

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            name: "Ada".into(),
            email: email.into(),
            password_hash: "hash".into(),
            role: Role::default(),
            avatar_path: None,
        }
    }

    #[tokio::test]
    async fn memory_repo_rejects_duplicate_email() {
        let repo = MemoryAccountRepo::default();
        repo.insert(new_account("ada@example.com")).await.unwrap();
        let err = repo.insert(new_account("ada@example.com")).await.unwrap_err();
        assert!(matches!(err, RepoError::Duplicate));
    }

    #[tokio::test]
    async fn memory_repo_redeems_token_once() {
        let repo = MemoryAccountRepo::default();
        let account = repo.insert(new_account("ada@example.com")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        repo.store_reset_token(account.id, "token", now + Duration::hours(1))
            .await
            .unwrap();

        let redeemed = repo
            .redeem_reset_token("token", now, "new-hash")
            .await
            .unwrap()
            .expect("token should redeem");
        assert_eq!(redeemed.password_hash, "new-hash");
        assert!(redeemed.reset_token.is_none());

        let again = repo.redeem_reset_token("token", now, "other").await.unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn memory_repo_rejects_expired_token() {
        let repo = MemoryAccountRepo::default();
        let account = repo.insert(new_account("ada@example.com")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        repo.store_reset_token(account.id, "token", now - Duration::minutes(1))
            .await
            .unwrap();

        let redeemed = repo.redeem_reset_token("token", now, "new-hash").await.unwrap();
        assert!(redeemed.is_none());
    }
}
