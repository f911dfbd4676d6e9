/// Authorization checks
///
/// Three layers, applied by handlers in this order:
///
/// 1. **User role** ([`require_user_role`]): the global role on `users`,
///    e.g. only coaches create agency invites and only staff reach the
///    admin console.
/// 2. **Account membership** ([`require_role`]): the caller's role in an
///    `ozza_accounts` row, ordered owner > admin > agency > client > viewer.
/// 3. **Project access** ([`require_project_access`]): the stronger of the
///    caller's role in the project's account and client-level access through
///    the project's client account.
///
/// # Example
///
/// ```no_run
/// use ozza_shared::auth::authorization::{require_role, require_user_role};
/// use ozza_shared::auth::middleware::AuthContext;
/// use ozza_shared::models::membership::MemberRole;
/// use ozza_shared::models::user::UserRole;
/// # async fn example(pool: sqlx::PgPool, auth: AuthContext, account_id: uuid::Uuid)
/// #     -> Result<(), Box<dyn std::error::Error>> {
/// require_user_role(&auth, &[UserRole::Coach])?;
/// require_role(&pool, account_id, auth.user_id, MemberRole::Admin).await?;
/// # Ok(())
/// # }
/// ```

use sqlx::PgExecutor;
use uuid::Uuid;

use super::middleware::AuthContext;
use crate::models::membership::{AccountMember, MemberRole};
use crate::models::project::Project;
use crate::models::user::UserRole;

#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    #[error("Not a member of account {0}")]
    NotMember(Uuid),

    #[error("Insufficient permissions: requires {required}, has {actual}")]
    InsufficientRole {
        required: MemberRole,
        actual: MemberRole,
    },

    #[error("Role {actual} may not perform this action")]
    RoleNotAllowed { actual: UserRole },

    #[error("Not authorized to access this resource")]
    NotAuthorized,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// What a caller wants to do with a project or one of its children
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourcePermission {
    /// View the project tree
    Read,
    /// Comment, submit time, review deliverables
    Comment,
    /// Create and edit project entities
    Write,
    /// Archive the project, manage account-level settings
    Manage,
}

impl ResourcePermission {
    pub fn min_role(&self) -> MemberRole {
        match self {
            ResourcePermission::Read => MemberRole::Viewer,
            ResourcePermission::Comment => MemberRole::Client,
            ResourcePermission::Write => MemberRole::Agency,
            ResourcePermission::Manage => MemberRole::Admin,
        }
    }
}

/// Rejects callers whose global role is not in `allowed`.
pub fn require_user_role(auth: &AuthContext, allowed: &[UserRole]) -> Result<(), AuthzError> {
    if allowed.contains(&auth.role) {
        Ok(())
    } else {
        Err(AuthzError::RoleNotAllowed { actual: auth.role })
    }
}

pub fn require_staff(auth: &AuthContext) -> Result<(), AuthzError> {
    require_user_role(auth, &[UserRole::Admin, UserRole::Developer])
}

pub async fn require_membership(
    db: impl PgExecutor<'_>,
    account_id: Uuid,
    user_id: Uuid,
) -> Result<MemberRole, AuthzError> {
    AccountMember::get_role(db, account_id, user_id)
        .await?
        .ok_or(AuthzError::NotMember(account_id))
}

/// Requires at least `required` in `account_id` and returns the caller's role.
pub async fn require_role(
    db: impl PgExecutor<'_>,
    account_id: Uuid,
    user_id: Uuid,
    required: MemberRole,
) -> Result<MemberRole, AuthzError> {
    let actual = require_membership(db, account_id, user_id).await?;

    if !actual.has_permission(&required) {
        return Err(AuthzError::InsufficientRole { required, actual });
    }

    Ok(actual)
}

fn stronger(a: Option<MemberRole>, b: Option<MemberRole>) -> Option<MemberRole> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if a.has_permission(&b) { a } else { b }),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Combines the caller's role in the owning account with client-account
/// membership.
///
/// A `client` membership in the owning account only records which agency a
/// client belongs to; it grants nothing on that agency's projects. Client
/// access comes from `project.client_account_id` alone and is capped at
/// client level.
fn effective_project_role(account_role: Option<MemberRole>, in_client_account: bool) -> Option<MemberRole> {
    let account_role = account_role.filter(|role| *role != MemberRole::Client);
    let client_role = in_client_account.then_some(MemberRole::Client);

    stronger(account_role, client_role)
}

/// Effective role on a project, or `None` without any access.
pub async fn project_role(
    db: impl PgExecutor<'_>,
    project: &Project,
    user_id: Uuid,
) -> Result<Option<MemberRole>, sqlx::Error> {
    let (account_role, in_client_account): (Option<MemberRole>, bool) = sqlx::query_as(
        "SELECT
             (SELECT role FROM ozza_account_members WHERE account_id = $1 AND user_id = $3),
             EXISTS (SELECT 1 FROM ozza_account_members WHERE account_id = $2 AND user_id = $3)",
    )
    .bind(project.account_id)
    .bind(project.client_account_id)
    .bind(user_id)
    .fetch_one(db)
    .await?;

    Ok(effective_project_role(account_role, in_client_account))
}

/// Checks `permission` on `project` for the caller and returns their role.
///
/// Staff without a membership get read-only access.
pub async fn require_project_access(
    db: impl PgExecutor<'_>,
    project: &Project,
    auth: &AuthContext,
    permission: ResourcePermission,
) -> Result<MemberRole, AuthzError> {
    let required = permission.min_role();

    match project_role(db, project, auth.user_id).await? {
        Some(actual) if actual.has_permission(&required) => Ok(actual),
        Some(actual) => Err(AuthzError::InsufficientRole { required, actual }),
        None if auth.is_staff() && permission == ResourcePermission::Read => Ok(MemberRole::Viewer),
        None => Err(AuthzError::NotMember(project.account_id)),
    }
}
