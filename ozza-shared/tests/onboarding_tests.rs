/// Invitation chain and community link integration tests
///
/// Require PostgreSQL via `DATABASE_URL`; skipped otherwise.

#[macro_use]
mod common;

use chrono::Duration;
use ozza_shared::auth::password::hash_password;
use ozza_shared::models::account::{Account, AccountKind};
use ozza_shared::models::community_link::CommunityLink;
use ozza_shared::models::invitation::{Invitation, InvitationKind, InvitationStatus};
use ozza_shared::models::membership::{AccountMember, MemberRole};
use ozza_shared::models::user::{User, UserRole};
use ozza_shared::onboarding::{
    create_community_link, issue_invitation, resolve_invitation, signup, InvitationError,
    IssueInvitation, IssuedInvitation, NewCommunityLink, NewSignup, Onboarding,
};
use sqlx::PgPool;
use uuid::Uuid;

async fn issue(
    pool: &PgPool,
    kind: InvitationKind,
    account_id: Uuid,
    invited_by: Uuid,
    email: Option<&str>,
    ttl: Duration,
) -> IssuedInvitation {
    let mut conn = pool.acquire().await.unwrap();
    issue_invitation(
        &mut conn,
        IssueInvitation {
            kind,
            account_id,
            invited_by,
            email: email.map(str::to_string),
            name: None,
            ttl,
        },
    )
    .await
    .unwrap()
}

async fn signup_with(pool: &PgPool, email: &str, onboarding: Onboarding) -> Result<User, InvitationError> {
    let mut tx = pool.begin().await.unwrap();
    let outcome = signup(
        &mut tx,
        NewSignup {
            email: email.to_string(),
            password_hash: hash_password("password123").unwrap(),
            name: Some("New Person".to_string()),
            onboarding,
            ip_address: Some("198.51.100.7".to_string()),
        },
    )
    .await?;
    tx.commit().await.unwrap();
    Ok(outcome.user)
}

async fn accept(pool: &PgPool, token: &str, user: &User) -> Result<(), InvitationError> {
    let mut tx = pool.begin().await.unwrap();
    resolve_invitation(&mut tx, token, user, None).await?;
    tx.commit().await.unwrap();
    Ok(())
}

#[tokio::test]
async fn test_root_signup_creates_coach_account() {
    let pool = require_db!();
    let email = common::unique_email("root");

    let user = signup_with(&pool, &email, Onboarding::Root).await.unwrap();
    assert_eq!(user.role, UserRole::Coach);

    let account = Account::find_owned(&pool, user.id, AccountKind::Coach)
        .await
        .unwrap()
        .expect("root account");
    assert!(account.parent_account_id.is_none());
    assert_eq!(
        AccountMember::get_role(&pool, account.id, user.id).await.unwrap(),
        Some(MemberRole::Owner)
    );
}

#[tokio::test]
async fn test_agency_invite_binds_into_coach_tree() {
    let pool = require_db!();
    let (coach, coach_account) = common::create_coach(&pool).await;

    let issued = issue(&pool, InvitationKind::Agency, coach_account.id, coach.id, None, Duration::hours(24)).await;
    assert!(issued.url("https://app.ozza.io").ends_with(&issued.token));

    let agency = signup_with(&pool, &common::unique_email("agency"), Onboarding::Invite(issued.token.clone()))
        .await
        .unwrap();
    assert_eq!(agency.role, UserRole::Agency);
    assert_eq!(User::find_role(&pool, agency.id).await.unwrap(), Some(UserRole::Agency));

    let agency_account = Account::find_owned(&pool, agency.id, AccountKind::Agency)
        .await
        .unwrap()
        .expect("agency account");
    assert_eq!(agency_account.parent_account_id, Some(coach_account.id));

    assert_eq!(
        AccountMember::get_role(&pool, coach_account.id, agency.id).await.unwrap(),
        Some(MemberRole::Agency)
    );
    assert_eq!(
        AccountMember::get_role(&pool, agency_account.id, agency.id).await.unwrap(),
        Some(MemberRole::Owner)
    );

    let invitation = Invitation::find_by_id(&pool, issued.invitation.id).await.unwrap().unwrap();
    assert_eq!(invitation.status, InvitationStatus::Used);
    assert_eq!(invitation.used_by, Some(agency.id));
    assert!(invitation.used_at.is_some());

    let (logged,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM security_logs WHERE event_type = 'invitation.accepted' AND user_id = $1",
    )
    .bind(agency.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(logged, 1);
}

#[tokio::test]
async fn test_full_chain_coach_agency_client() {
    let pool = require_db!();
    let (coach, coach_account) = common::create_coach(&pool).await;

    let agency_invite = issue(&pool, InvitationKind::Agency, coach_account.id, coach.id, None, Duration::hours(1)).await;
    let agency = signup_with(&pool, &common::unique_email("agency"), Onboarding::Invite(agency_invite.token))
        .await
        .unwrap();
    let agency_account = Account::find_owned(&pool, agency.id, AccountKind::Agency).await.unwrap().unwrap();

    let client_invite =
        issue(&pool, InvitationKind::Client, agency_account.id, agency.id, None, Duration::hours(1)).await;
    let client = signup_with(&pool, &common::unique_email("client"), Onboarding::Invite(client_invite.token))
        .await
        .unwrap();

    assert_eq!(client.role, UserRole::Client);
    let client_account = Account::find_owned(&pool, client.id, AccountKind::Client).await.unwrap().unwrap();
    assert_eq!(client_account.parent_account_id, Some(agency_account.id));

    let children = Account::list_children(&pool, agency_account.id).await.unwrap();
    assert!(children.iter().any(|a| a.id == client_account.id));
    assert_eq!(
        AccountMember::get_role(&pool, agency_account.id, client.id).await.unwrap(),
        Some(MemberRole::Client)
    );
}

#[tokio::test]
async fn test_invite_consumed_at_most_once() {
    let pool = require_db!();
    let (coach, coach_account) = common::create_coach(&pool).await;
    let issued = issue(&pool, InvitationKind::Agency, coach_account.id, coach.id, None, Duration::hours(1)).await;

    let first = common::create_user(&pool, UserRole::Client).await;
    let second = common::create_user(&pool, UserRole::Client).await;

    accept(&pool, &issued.token, &first).await.unwrap();

    let again = accept(&pool, &issued.token, &second).await;
    assert!(matches!(again, Err(InvitationError::AlreadyUsed)));

    assert_eq!(AccountMember::get_role(&pool, coach_account.id, second.id).await.unwrap(), None);
}

#[tokio::test]
async fn test_concurrent_resolution_has_one_winner() {
    let pool = require_db!();
    let (coach, coach_account) = common::create_coach(&pool).await;
    let issued = issue(&pool, InvitationKind::Agency, coach_account.id, coach.id, None, Duration::hours(1)).await;

    let users = [
        common::create_user(&pool, UserRole::Client).await,
        common::create_user(&pool, UserRole::Client).await,
    ];

    let handles: Vec<_> = users
        .iter()
        .cloned()
        .map(|user| {
            let pool = pool.clone();
            let token = issued.token.clone();
            tokio::spawn(async move { accept(&pool, &token, &user).await })
        })
        .collect();

    let mut winners = 0;
    let mut already_used = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => winners += 1,
            Err(InvitationError::AlreadyUsed) => already_used += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(already_used, 1);
}

#[tokio::test]
async fn test_expired_invite_is_rejected() {
    let pool = require_db!();
    let (coach, coach_account) = common::create_coach(&pool).await;
    let issued = issue(&pool, InvitationKind::Agency, coach_account.id, coach.id, None, Duration::hours(-1)).await;

    assert_eq!(issued.invitation.status, InvitationStatus::Pending);
    assert_eq!(issued.invitation.effective_status(), InvitationStatus::Expired);

    let user = common::create_user(&pool, UserRole::Client).await;
    let result = accept(&pool, &issued.token, &user).await;
    assert!(matches!(result, Err(InvitationError::Expired)));

    // The sweep persists the status
    let swept = Invitation::expire_stale(&pool).await.unwrap();
    assert!(swept >= 1);
    let invitation = Invitation::find_by_id(&pool, issued.invitation.id).await.unwrap().unwrap();
    assert_eq!(invitation.status, InvitationStatus::Expired);
}

#[tokio::test]
async fn test_revoked_invite_is_rejected() {
    let pool = require_db!();
    let (coach, coach_account) = common::create_coach(&pool).await;
    let issued = issue(&pool, InvitationKind::Agency, coach_account.id, coach.id, None, Duration::hours(1)).await;

    let revoked = Invitation::revoke(&pool, issued.invitation.id, coach_account.id).await.unwrap();
    assert_eq!(revoked.map(|i| i.status), Some(InvitationStatus::Revoked));

    // Revoking again is a no-op
    assert!(Invitation::revoke(&pool, issued.invitation.id, coach_account.id).await.unwrap().is_none());

    let user = common::create_user(&pool, UserRole::Client).await;
    assert!(matches!(accept(&pool, &issued.token, &user).await, Err(InvitationError::Revoked)));
}

#[tokio::test]
async fn test_email_bound_invite() {
    let pool = require_db!();
    let (coach, coach_account) = common::create_coach(&pool).await;
    let invited = common::create_user(&pool, UserRole::Client).await;

    let issued = issue(
        &pool,
        InvitationKind::Agency,
        coach_account.id,
        coach.id,
        Some(&invited.email.to_uppercase()),
        Duration::hours(1),
    )
    .await;

    let stranger = common::create_user(&pool, UserRole::Client).await;
    assert!(matches!(
        accept(&pool, &issued.token, &stranger).await,
        Err(InvitationError::EmailMismatch)
    ));

    accept(&pool, &issued.token, &invited).await.unwrap();
}

#[tokio::test]
async fn test_unknown_and_malformed_tokens() {
    let pool = require_db!();
    let user = common::create_user(&pool, UserRole::Client).await;

    assert!(matches!(
        accept(&pool, "not-a-token", &user).await,
        Err(InvitationError::InvalidToken)
    ));

    let (unknown, _) = ozza_shared::auth::token::generate_invite_token();
    assert!(matches!(accept(&pool, &unknown, &user).await, Err(InvitationError::NotFound)));
}

#[tokio::test]
async fn test_failed_signup_rolls_back_user() {
    let pool = require_db!();
    let email = common::unique_email("rollback");
    let (unknown, _) = ozza_shared::auth::token::generate_invite_token();

    let result = signup_with(&pool, &email, Onboarding::Invite(unknown)).await;
    assert!(matches!(result, Err(InvitationError::NotFound)));

    assert!(User::find_by_email(&pool, &email).await.unwrap().is_none());
}

#[tokio::test]
async fn test_membership_insert_is_idempotent() {
    let pool = require_db!();
    let (_, coach_account) = common::create_coach(&pool).await;
    let user = common::create_user(&pool, UserRole::Agency).await;

    assert!(AccountMember::ensure(&pool, coach_account.id, user.id, MemberRole::Agency).await.unwrap());
    assert!(!AccountMember::ensure(&pool, coach_account.id, user.id, MemberRole::Agency).await.unwrap());
    // An existing row keeps its role
    assert!(!AccountMember::ensure(&pool, coach_account.id, user.id, MemberRole::Viewer).await.unwrap());

    assert_eq!(
        AccountMember::get_role(&pool, coach_account.id, user.id).await.unwrap(),
        Some(MemberRole::Agency)
    );
}

#[tokio::test]
async fn test_existing_agency_accepts_second_coach() {
    let pool = require_db!();
    let (coach_a, account_a) = common::create_coach(&pool).await;
    let (coach_b, account_b) = common::create_coach(&pool).await;

    let first = issue(&pool, InvitationKind::Agency, account_a.id, coach_a.id, None, Duration::hours(1)).await;
    let agency = signup_with(&pool, &common::unique_email("agency"), Onboarding::Invite(first.token))
        .await
        .unwrap();

    let second = issue(&pool, InvitationKind::Agency, account_b.id, coach_b.id, None, Duration::hours(1)).await;
    accept(&pool, &second.token, &agency).await.unwrap();

    // Never re-parented
    let owned = Account::find_owned(&pool, agency.id, AccountKind::Agency).await.unwrap().unwrap();
    assert_eq!(owned.parent_account_id, Some(account_a.id));

    assert_eq!(
        AccountMember::get_role(&pool, account_b.id, agency.id).await.unwrap(),
        Some(MemberRole::Agency)
    );
}

#[tokio::test]
async fn test_staff_role_is_not_downgraded() {
    let pool = require_db!();
    let (coach, coach_account) = common::create_coach(&pool).await;
    let admin = common::create_user(&pool, UserRole::Admin).await;

    let issued = issue(&pool, InvitationKind::Agency, coach_account.id, coach.id, None, Duration::hours(1)).await;
    accept(&pool, &issued.token, &admin).await.unwrap();

    assert_eq!(User::find_role(&pool, admin.id).await.unwrap(), Some(UserRole::Admin));
}

#[tokio::test]
async fn test_community_link_cap_is_enforced() {
    let pool = require_db!();
    let (agency, agency_account) = {
        let (coach, coach_account) = common::create_coach(&pool).await;
        let issued = issue(&pool, InvitationKind::Agency, coach_account.id, coach.id, None, Duration::hours(1)).await;
        let agency = signup_with(&pool, &common::unique_email("agency"), Onboarding::Invite(issued.token))
            .await
            .unwrap();
        let account = Account::find_owned(&pool, agency.id, AccountKind::Agency).await.unwrap().unwrap();
        (agency, account)
    };

    let link = {
        let mut conn = pool.acquire().await.unwrap();
        create_community_link(
            &mut conn,
            NewCommunityLink {
                account_id: agency_account.id,
                created_by: agency.id,
                kind: InvitationKind::Client,
                max_uses: Some(2),
                expires_at: None,
            },
        )
        .await
        .unwrap()
    };

    for _ in 0..2 {
        let client = signup_with(
            &pool,
            &common::unique_email("client"),
            Onboarding::Community(link.code.to_lowercase()),
        )
        .await
        .unwrap();
        assert_eq!(client.role, UserRole::Client);
        assert_eq!(
            AccountMember::get_role(&pool, agency_account.id, client.id).await.unwrap(),
            Some(MemberRole::Client)
        );
    }

    let third = signup_with(&pool, &common::unique_email("client"), Onboarding::Community(link.code.clone())).await;
    assert!(matches!(third, Err(InvitationError::LinkUnavailable)));

    let link = CommunityLink::find_by_id(&pool, link.id).await.unwrap().unwrap();
    assert_eq!(link.usage_count, 2);
    assert_eq!(link.remaining_uses(), Some(0));
}

#[tokio::test]
async fn test_deactivated_community_link() {
    let pool = require_db!();
    let (coach, coach_account) = common::create_coach(&pool).await;

    let link = {
        let mut conn = pool.acquire().await.unwrap();
        create_community_link(
            &mut conn,
            NewCommunityLink {
                account_id: coach_account.id,
                created_by: coach.id,
                kind: InvitationKind::Agency,
                max_uses: None,
                expires_at: None,
            },
        )
        .await
        .unwrap()
    };

    CommunityLink::deactivate(&pool, link.id, coach_account.id).await.unwrap().unwrap();

    let result = signup_with(&pool, &common::unique_email("agency"), Onboarding::Community(link.code)).await;
    assert!(matches!(result, Err(InvitationError::LinkUnavailable)));
}
