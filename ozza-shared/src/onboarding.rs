/// Onboarding: signup, invitation resolution and community link redemption
///
/// Every function here takes a `&mut PgConnection` so the caller decides
/// the transaction boundary. The intended use is one transaction per
/// signup or acceptance:
///
/// ```no_run
/// use ozza_shared::onboarding::{signup, Onboarding, NewSignup};
/// # async fn example(pool: sqlx::PgPool, password_hash: String) -> Result<(), Box<dyn std::error::Error>> {
/// let mut tx = pool.begin().await?;
/// let outcome = signup(&mut tx, NewSignup {
///     email: "riley@example.com".to_string(),
///     password_hash,
///     name: Some("Riley".to_string()),
///     onboarding: Onboarding::Invite("ozi_...".to_string()),
///     ip_address: None,
/// })
/// .await?;
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
///
/// Resolving an invitation row-locks it first, so a double submit blocks on
/// the lock and then sees `used`. Membership inserts are
/// `ON CONFLICT DO NOTHING`, so a retried resolution is harmless.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::auth::token::{
    generate_community_code, generate_invite_token, hash_invite_token, normalize_community_code,
    validate_invite_token_format,
};
use crate::models::account::{Account, AccountKind, CreateAccount};
use crate::models::community_link::{CommunityLink, CreateCommunityLink};
use crate::models::invitation::{CreateInvitation, Invitation, InvitationKind, InvitationStatus};
use crate::models::membership::{AccountMember, MemberRole};
use crate::models::security_log::{NewSecurityLog, SecurityLog};
use crate::models::user::{CreateUser, User, UserRole};

#[derive(Debug, thiserror::Error)]
pub enum InvitationError {
    #[error("Invitation not found")]
    NotFound,

    #[error("Invitation has already been used")]
    AlreadyUsed,

    #[error("Invitation has been revoked")]
    Revoked,

    #[error("Invitation has expired")]
    Expired,

    #[error("Invitation was issued for a different email address")]
    EmailMismatch,

    #[error("Malformed invitation token")]
    InvalidToken,

    #[error("Community link is unknown, inactive, expired or full")]
    LinkUnavailable,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl InvitationError {
    fn for_status(status: InvitationStatus) -> Option<Self> {
        match status {
            InvitationStatus::Pending => None,
            InvitationStatus::Used => Some(InvitationError::AlreadyUsed),
            InvitationStatus::Revoked => Some(InvitationError::Revoked),
            InvitationStatus::Expired => Some(InvitationError::Expired),
        }
    }
}

/// How a new user joins
#[derive(Debug, Clone)]
pub enum Onboarding {
    /// A coach with a fresh root account
    Root,
    /// Plaintext invitation token from the invite URL
    Invite(String),
    /// Community link code from the referral URL
    Community(String),
}

#[derive(Debug, Clone)]
pub struct NewSignup {
    pub email: String,
    /// Already hashed
    pub password_hash: String,
    pub name: Option<String>,
    pub onboarding: Onboarding,
    pub ip_address: Option<String>,
}

/// Where an onboarded user ended up
#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    pub role: UserRole,
    /// The account the user owns
    pub account: Account,
    /// The inviting account, `None` for a root coach
    pub parent_account_id: Option<Uuid>,
    /// `false` when the parent membership already existed
    pub membership_created: bool,
}

#[derive(Debug, Clone)]
pub struct SignupOutcome {
    pub user: User,
    pub attachment: Attachment,
}

fn member_role_for(kind: InvitationKind) -> MemberRole {
    match kind {
        InvitationKind::Agency => MemberRole::Agency,
        InvitationKind::Client => MemberRole::Client,
    }
}

fn default_account_name(user: &User) -> String {
    match user.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => user.email.split('@').next().unwrap_or(&user.email).to_string(),
    }
}

/// Creates the root coach account for `user` and its owner membership.
pub async fn create_coach_root(conn: &mut PgConnection, user: &User) -> Result<Account, sqlx::Error> {
    let account = Account::create(
        &mut *conn,
        CreateAccount {
            name: default_account_name(user),
            kind: AccountKind::Coach,
            owner_id: user.id,
            parent_account_id: None,
        },
    )
    .await?;

    AccountMember::ensure(&mut *conn, account.id, user.id, MemberRole::Owner).await?;

    Ok(account)
}

/// Binds `user` under `parent_account_id` as `kind`.
///
/// Assigns the role (staff keep theirs), finds or creates the user's owned
/// account of the target kind parented to `parent_account_id`, and ensures
/// both the owner membership and the membership in the parent. An account
/// the user already owns keeps its original parent.
pub async fn attach_to_parent(
    conn: &mut PgConnection,
    user: &User,
    kind: InvitationKind,
    parent_account_id: Uuid,
) -> Result<Attachment, sqlx::Error> {
    let role = User::assign_invited_role(&mut *conn, user.id, kind.target_role()).await?;

    let account_kind = kind.target_account_kind();
    let account = match Account::find_owned(&mut *conn, user.id, account_kind).await? {
        Some(existing) => existing,
        None => {
            Account::create(
                &mut *conn,
                CreateAccount {
                    name: default_account_name(user),
                    kind: account_kind,
                    owner_id: user.id,
                    parent_account_id: Some(parent_account_id),
                },
            )
            .await?
        }
    };

    AccountMember::ensure(&mut *conn, account.id, user.id, MemberRole::Owner).await?;

    let membership_created =
        AccountMember::ensure(&mut *conn, parent_account_id, user.id, member_role_for(kind)).await?;

    Ok(Attachment {
        role,
        account,
        parent_account_id: Some(parent_account_id),
        membership_created,
    })
}

/// Resolves an invitation token for `user`.
pub async fn resolve_invitation(
    conn: &mut PgConnection,
    token: &str,
    user: &User,
    ip_address: Option<String>,
) -> Result<Attachment, InvitationError> {
    if !validate_invite_token_format(token) {
        return Err(InvitationError::InvalidToken);
    }

    let invitation = Invitation::lock_by_token_hash(&mut *conn, &hash_invite_token(token))
        .await?
        .ok_or(InvitationError::NotFound)?;

    if let Some(err) = InvitationError::for_status(invitation.effective_status()) {
        return Err(err);
    }

    if !invitation.accepts_email(&user.email) {
        return Err(InvitationError::EmailMismatch);
    }

    let attachment = attach_to_parent(conn, user, invitation.kind, invitation.account_id).await?;

    if !Invitation::mark_used(&mut *conn, invitation.id, user.id).await? {
        return Err(InvitationError::AlreadyUsed);
    }

    SecurityLog::record(
        &mut *conn,
        NewSecurityLog::new("invitation.accepted")
            .user(user.id, user.email.clone())
            .ip(ip_address)
            .details(json!({
                "invitation_id": invitation.id,
                "kind": invitation.kind,
                "account_id": invitation.account_id,
                "invited_by": invitation.invited_by,
            })),
    )
    .await?;

    tracing::info!(
        invitation_id = %invitation.id,
        user_id = %user.id,
        account_id = %invitation.account_id,
        kind = %invitation.kind,
        "Invitation accepted"
    );

    Ok(attachment)
}

/// Consumes one use of a community link and attaches `user` under it.
pub async fn redeem_community_link(
    conn: &mut PgConnection,
    code: &str,
    user: &User,
    ip_address: Option<String>,
) -> Result<Attachment, InvitationError> {
    let code = normalize_community_code(code);

    let link = CommunityLink::redeem(&mut *conn, &code)
        .await?
        .ok_or(InvitationError::LinkUnavailable)?;

    let attachment = attach_to_parent(conn, user, link.kind, link.account_id).await?;

    SecurityLog::record(
        &mut *conn,
        NewSecurityLog::new("community_link.redeemed")
            .user(user.id, user.email.clone())
            .ip(ip_address)
            .details(json!({
                "link_id": link.id,
                "kind": link.kind,
                "account_id": link.account_id,
                "usage_count": link.usage_count,
            })),
    )
    .await?;

    tracing::info!(
        link_id = %link.id,
        user_id = %user.id,
        account_id = %link.account_id,
        usage_count = link.usage_count,
        "Community link redeemed"
    );

    Ok(attachment)
}

/// Creates the user and onboards them.
///
/// Invited and referred users start with the least-privileged role; the
/// resolution step assigns their final one.
pub async fn signup(conn: &mut PgConnection, data: NewSignup) -> Result<SignupOutcome, InvitationError> {
    let provisional_role = match data.onboarding {
        Onboarding::Root => UserRole::Coach,
        Onboarding::Invite(_) | Onboarding::Community(_) => UserRole::Client,
    };

    let user = User::create(
        &mut *conn,
        CreateUser {
            email: data.email,
            password_hash: data.password_hash,
            name: data.name,
            role: provisional_role,
        },
    )
    .await?;

    let attachment = match &data.onboarding {
        Onboarding::Root => {
            let account = create_coach_root(conn, &user).await?;
            Attachment {
                role: UserRole::Coach,
                account,
                parent_account_id: None,
                membership_created: true,
            }
        }
        Onboarding::Invite(token) => {
            resolve_invitation(conn, token, &user, data.ip_address.clone()).await?
        }
        Onboarding::Community(code) => {
            redeem_community_link(conn, code, &user, data.ip_address.clone()).await?
        }
    };

    SecurityLog::record(
        &mut *conn,
        NewSecurityLog::new("auth.signup")
            .user(user.id, user.email.clone())
            .ip(data.ip_address)
            .details(json!({ "role": attachment.role, "account_id": attachment.account.id })),
    )
    .await?;

    let user = User { role: attachment.role, ..user };

    Ok(SignupOutcome { user, attachment })
}

/// Input for [`issue_invitation`]
#[derive(Debug, Clone)]
pub struct IssueInvitation {
    pub kind: InvitationKind,
    pub account_id: Uuid,
    pub invited_by: Uuid,
    pub email: Option<String>,
    pub name: Option<String>,
    pub ttl: Duration,
}

/// A fresh invitation and the only copy of its plaintext token
#[derive(Debug, Clone)]
pub struct IssuedInvitation {
    pub invitation: Invitation,
    pub token: String,
}

impl IssuedInvitation {
    pub fn url(&self, app_base_url: &str) -> String {
        invite_url(app_base_url, &self.token)
    }
}

pub fn invite_url(app_base_url: &str, token: &str) -> String {
    format!("{}/signup?invite={}", app_base_url.trim_end_matches('/'), token)
}

pub fn community_url(app_base_url: &str, code: &str) -> String {
    format!("{}/signup?ref={}", app_base_url.trim_end_matches('/'), code)
}

pub async fn issue_invitation(
    conn: &mut PgConnection,
    data: IssueInvitation,
) -> Result<IssuedInvitation, sqlx::Error> {
    let (token, token_hash) = generate_invite_token();

    let invitation = Invitation::create(
        &mut *conn,
        CreateInvitation {
            kind: data.kind,
            token_hash,
            email: data.email,
            name: data.name,
            account_id: data.account_id,
            invited_by: data.invited_by,
            ttl: data.ttl,
        },
    )
    .await?;

    tracing::info!(
        invitation_id = %invitation.id,
        account_id = %invitation.account_id,
        kind = %invitation.kind,
        expires_at = %invitation.expires_at,
        "Invitation issued"
    );

    Ok(IssuedInvitation { invitation, token })
}

/// Input for [`create_community_link`]
#[derive(Debug, Clone)]
pub struct NewCommunityLink {
    pub account_id: Uuid,
    pub created_by: Uuid,
    pub kind: InvitationKind,
    pub max_uses: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Attempts before giving up on a unique code
const CODE_ATTEMPTS: usize = 5;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// Creates a link with a fresh code, retrying on the rare code collision.
///
/// Each attempt runs in its own savepoint so a collision does not abort the
/// caller's transaction.
pub async fn create_community_link(
    conn: &mut PgConnection,
    data: NewCommunityLink,
) -> Result<CommunityLink, sqlx::Error> {
    use sqlx::Connection;

    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut savepoint = conn.begin().await?;

        let result = CommunityLink::create(
            &mut *savepoint,
            CreateCommunityLink {
                code: generate_community_code(),
                account_id: data.account_id,
                created_by: data.created_by,
                kind: data.kind,
                max_uses: data.max_uses,
                expires_at: data.expires_at,
            },
        )
        .await;

        match result {
            Ok(link) => {
                savepoint.commit().await?;
                return Ok(link);
            }
            Err(err) if is_unique_violation(&err) && attempt < CODE_ATTEMPTS => {
                savepoint.rollback().await?;
                tracing::warn!(attempt, "Community code collision, retrying");
            }
            Err(err) => return Err(err),
        }
    }
}

/// What an invite link shows before signup
#[derive(Debug, Clone, Serialize)]
pub struct InvitationPreview {
    pub kind: InvitationKind,
    pub email: Option<String>,
    pub name: Option<String>,
    pub account_name: String,
    pub expires_at: DateTime<Utc>,
}

pub async fn preview_invitation(
    conn: &mut PgConnection,
    token: &str,
) -> Result<InvitationPreview, InvitationError> {
    if !validate_invite_token_format(token) {
        return Err(InvitationError::InvalidToken);
    }

    let invitation = Invitation::find_by_token_hash(&mut *conn, &hash_invite_token(token))
        .await?
        .ok_or(InvitationError::NotFound)?;

    if let Some(err) = InvitationError::for_status(invitation.effective_status()) {
        return Err(err);
    }

    let account = Account::find_by_id(&mut *conn, invitation.account_id)
        .await?
        .ok_or(InvitationError::NotFound)?;

    Ok(InvitationPreview {
        kind: invitation.kind,
        email: invitation.email,
        name: invitation.name,
        account_name: account.name,
        expires_at: invitation.expires_at,
    })
}

/// What a community link shows before signup
#[derive(Debug, Clone, Serialize)]
pub struct CommunityPreview {
    pub kind: InvitationKind,
    pub account_name: String,
    pub remaining_uses: Option<i32>,
}

pub async fn preview_community_link(
    conn: &mut PgConnection,
    code: &str,
) -> Result<CommunityPreview, InvitationError> {
    let link = CommunityLink::find_by_code(&mut *conn, &normalize_community_code(code))
        .await?
        .filter(|link| link.is_redeemable_at(Utc::now()))
        .ok_or(InvitationError::LinkUnavailable)?;

    let account = Account::find_by_id(&mut *conn, link.account_id)
        .await?
        .ok_or(InvitationError::LinkUnavailable)?;

    Ok(CommunityPreview {
        kind: link.kind,
        account_name: account.name,
        remaining_uses: link.remaining_uses(),
    })
}
