/// User model and database operations
///
/// A user signs up once and can then belong to many accounts through
/// `ozza_account_members`. The `role` column drives which dashboard the
/// user lands on and which invitation endpoints they may call; invite
/// resolution can change it after signup.
///
/// # Example
///
/// ```no_run
/// use ozza_shared::models::user::{CreateUser, User, UserRole};
/// # async fn example(pool: sqlx::PgPool) -> Result<(), sqlx::Error> {
/// let user = User::create(&pool, CreateUser {
///     email: "Coach@Example.com".to_string(),
///     password_hash: "$argon2id$...".to_string(),
///     name: Some("Casey".to_string()),
///     role: UserRole::Coach,
/// })
/// .await?;
///
/// assert_eq!(user.email, "coach@example.com");
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, Postgres, QueryBuilder};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const USER_COLUMNS: &str =
    "id, email, password_hash, name, avatar_url, role, created_at, updated_at, last_login_at";

/// Platform-level role of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Coach,
    Agency,
    Client,
    Admin,
    Developer,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Coach => "coach",
            UserRole::Agency => "agency",
            UserRole::Client => "client",
            UserRole::Admin => "admin",
            UserRole::Developer => "developer",
        }
    }

    /// Staff roles reach the admin console and are never downgraded by an invite.
    pub fn is_staff(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Developer)
    }

    /// Path the frontend sends a freshly authenticated user to
    pub fn landing_path(&self) -> &'static str {
        match self {
            UserRole::Coach => "/coach/dashboard",
            UserRole::Agency => "/agency/dashboard",
            UserRole::Client => "/client/dashboard",
            UserRole::Admin | UserRole::Developer => "/admin",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coach" => Ok(UserRole::Coach),
            "agency" => Ok(UserRole::Agency),
            "client" => Ok(UserRole::Client),
            "admin" => Ok(UserRole::Admin),
            "developer" => Ok(UserRole::Developer),
            other => Err(format!("unknown user role: {}", other)),
        }
    }
}

/// A user row. `password_hash` never leaves the server.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,

    /// Always stored lowercase
    pub email: String,

    /// Argon2id PHC string
    #[serde(skip_serializing)]
    pub password_hash: String,

    pub name: Option<String>,

    pub avatar_url: Option<String>,

    pub role: UserRole,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub last_login_at: Option<DateTime<Utc>>,
}

/// Input for [`User::create`]
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub email: String,
    /// Already hashed; see `auth::password::hash_password`
    pub password_hash: String,
    pub name: Option<String>,
    pub role: UserRole,
}

/// Partial update; `None` leaves a column untouched, `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct UpdateUser {
    pub name: Option<Option<String>>,
    pub avatar_url: Option<Option<String>>,
    pub password_hash: Option<String>,
}

/// Lowercases and trims an email address before it touches the database.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl User {
    /// Inserts a user. The email is normalized first.
    ///
    /// # Errors
    ///
    /// A unique violation on `users_email_key` when the email is taken.
    pub async fn create(db: impl PgExecutor<'_>, data: CreateUser) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (email, password_hash, name, role)
             VALUES ($1, $2, $3, $4)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(normalize_email(&data.email))
        .bind(data.password_hash)
        .bind(data.name)
        .bind(data.role)
        .fetch_one(db)
        .await
    }

    pub async fn find_by_id(db: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    /// Case-insensitive lookup (the argument is normalized before binding).
    pub async fn find_by_email(
        db: impl PgExecutor<'_>,
        email: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(normalize_email(email))
            .fetch_optional(db)
            .await
    }

    /// Reads only the role column. Used by the dashboard redirect.
    pub async fn find_role(db: impl PgExecutor<'_>, id: Uuid) -> Result<Option<UserRole>, sqlx::Error> {
        sqlx::query_scalar::<_, UserRole>("SELECT role FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    /// Applies the non-`None` fields of `data`.
    ///
    /// Returns `None` when the user does not exist.
    pub async fn update(
        db: impl PgExecutor<'_>,
        id: Uuid,
        data: UpdateUser,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE users SET updated_at = NOW()");

        if let Some(name) = data.name {
            query.push(", name = ").push_bind(name);
        }
        if let Some(avatar_url) = data.avatar_url {
            query.push(", avatar_url = ").push_bind(avatar_url);
        }
        if let Some(password_hash) = data.password_hash {
            query.push(", password_hash = ").push_bind(password_hash);
        }

        query.push(" WHERE id = ").push_bind(id);
        query.push(format!(" RETURNING {USER_COLUMNS}"));

        query.build_query_as::<User>().fetch_optional(db).await
    }

    /// Assigns the role carried by an invitation. Staff users keep their role;
    /// the returned value is the role the user ends up with.
    pub async fn assign_invited_role(
        db: impl PgExecutor<'_>,
        id: Uuid,
        role: UserRole,
    ) -> Result<UserRole, sqlx::Error> {
        sqlx::query_scalar::<_, UserRole>(
            "UPDATE users
             SET role = CASE WHEN role IN ('admin', 'developer') THEN role ELSE $2 END
             WHERE id = $1
             RETURNING role",
        )
        .bind(id)
        .bind(role)
        .fetch_one(db)
        .await
    }

    pub async fn update_last_login(db: impl PgExecutor<'_>, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn count(db: impl PgExecutor<'_>) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users").fetch_one(db).await
    }

    /// Users per role, for the admin console
    pub async fn count_by_role(db: impl PgExecutor<'_>) -> Result<Vec<(UserRole, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (UserRole, i64)>(
            "SELECT role, COUNT(*) FROM users GROUP BY role ORDER BY role",
        )
        .fetch_all(db)
        .await
    }

    /// Public profile without credentials or timestamps
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            avatar_url: self.avatar_url.clone(),
            role: self.role,
        }
    }
}

/// What other members of an account see about a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: UserRole,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Coach@Example.COM "), "coach@example.com");
        assert_eq!(normalize_email("a@b.c"), "a@b.c");
    }

    #[test]
    fn test_user_role_round_trip_through_str() {
        for role in [
            UserRole::Coach,
            UserRole::Agency,
            UserRole::Client,
            UserRole::Admin,
            UserRole::Developer,
        ] {
            assert_eq!(role.as_str().parse::<UserRole>().unwrap(), role);
        }
        assert!("owner".parse::<UserRole>().is_err());
    }

    #[test]
    fn test_staff_roles() {
        assert!(UserRole::Admin.is_staff());
        assert!(UserRole::Developer.is_staff());
        assert!(!UserRole::Coach.is_staff());
        assert!(!UserRole::Client.is_staff());
    }

    #[test]
    fn test_landing_paths_are_role_specific() {
        assert_eq!(UserRole::Coach.landing_path(), "/coach/dashboard");
        assert_eq!(UserRole::Agency.landing_path(), "/agency/dashboard");
        assert_eq!(UserRole::Client.landing_path(), "/client/dashboard");
        assert_eq!(UserRole::Developer.landing_path(), "/admin");
    }

    #[test]
    fn test_password_hash_is_not_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            name: None,
            avatar_url: None,
            role: UserRole::Client,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_login_at: None,
        };

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "client");
    }

    // Integration tests for database operations are in tests/models_tests.rs
}
