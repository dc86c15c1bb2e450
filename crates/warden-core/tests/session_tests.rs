// Session lifecycle tests: creation, the two validation checks, ending a
// session each possible way, and the listing/maintenance reads.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use warden_core::AppState;
use warden_core::auth::{ClientInfo, SessionContext};
use warden_core::config::RevocationPolicy;
use warden_core::db::DEMO_USERNAME;
use warden_core::models::{audit_log, session, user};
use warden_core::testing::{create_user, setup_state, test_config};

async fn admin(state: &AppState) -> user::Model {
    user::Entity::find()
        .filter(user::Column::Username.eq(DEMO_USERNAME))
        .one(&state.db)
        .await
        .unwrap()
        .expect("demo user is seeded")
}

async fn logged_in(state: &AppState, who: &user::Model) -> (SessionContext, String) {
    let mut ctx = SessionContext::new();
    let token = state
        .sessions
        .create_session(&mut ctx, &ClientInfo::local(), who.id, &who.username)
        .await
        .expect("session is created");
    (ctx, token)
}

async fn admin_last_login(state: &AppState) -> Option<chrono::NaiveDateTime> {
    admin(state).await.last_login
}

async fn session_row(state: &AppState, token: &str) -> session::Model {
    session::Entity::find()
        .filter(session::Column::Token.eq(token))
        .one(&state.db)
        .await
        .unwrap()
        .expect("session row exists")
}

async fn expire_in_store(state: &AppState, token: &str) {
    session::Entity::update_many()
        .col_expr(
            session::Column::ExpiresAt,
            Expr::value(Utc::now().naive_utc() - chrono::Duration::seconds(1)),
        )
        .filter(session::Column::Token.eq(token))
        .exec(&state.db)
        .await
        .unwrap();
}

// ═══════════════════════════════════════════════════════════════
// Creation
// ═══════════════════════════════════════════════════════════════

mod creation_tests {
    use super::*;

    #[tokio::test]
    async fn test_created_session_validates_immediately() {
        let state = setup_state(test_config()).await;
        let admin = admin(&state).await;
        let (mut ctx, token) = logged_in(&state, &admin).await;

        assert_eq!(token.len(), 128);
        assert_eq!(ctx.token(), Some(token.as_str()));
        assert_eq!(ctx.user_id(), Some(admin.id));
        assert_eq!(ctx.username(), Some(DEMO_USERNAME));

        let active = state
            .sessions
            .validate_session(&mut ctx, &ClientInfo::local())
            .await
            .expect("fresh session validates");
        assert_eq!(active.user.id, admin.id);
        assert_eq!(active.session.token, token);
        assert!(ctx.is_established());
    }

    #[tokio::test]
    async fn test_creation_records_login_and_audit() {
        let state = setup_state(test_config()).await;
        let admin = admin(&state).await;
        let (_ctx, token) = logged_in(&state, &admin).await;

        let row = session_row(&state, &token).await;
        assert!(row.is_active);
        assert_eq!(row.ip_address, "127.0.0.1");
        assert_eq!(row.expires_at - row.created_at, chrono::Duration::seconds(1800));

        let refreshed = user::Entity::find_by_id(admin.id)
            .one(&state.db)
            .await
            .unwrap()
            .unwrap();
        assert!(refreshed.last_login.is_some());

        let logged = audit_log::Entity::find()
            .filter(audit_log::Column::Action.eq("LOGIN_SUCCESS"))
            .one(&state.db)
            .await
            .unwrap()
            .expect("login audited");
        assert_eq!(logged.user_id, Some(admin.id));
    }

    #[tokio::test]
    async fn test_unknown_user_applies_nothing() {
        let state = setup_state(test_config()).await;
        let mut ctx = SessionContext::new();

        let result = state
            .sessions
            .create_session(&mut ctx, &ClientInfo::local(), 9999, "ghost")
            .await;
        assert!(matches!(result, Err(warden_core::WardenError::NotFound(_))));
        assert!(!ctx.is_established());
        assert!(session::Entity::find().all(&state.db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tokens_are_never_reused() {
        let state = setup_state(test_config()).await;
        let admin = admin(&state).await;
        let (_, first) = logged_in(&state, &admin).await;
        let (_, second) = logged_in(&state, &admin).await;
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_duplicate_token_write_is_rejected() {
        use sea_orm::{ActiveModelTrait, Set};
        use warden_core::WardenError;

        let state = setup_state(test_config()).await;
        let admin = admin(&state).await;
        let (_, token) = logged_in(&state, &admin).await;
        let original = session_row(&state, &token).await;

        let now = Utc::now().naive_utc();
        let err = session::ActiveModel {
            user_id: Set(admin.id),
            token: Set(token.clone()),
            ip_address: Set("198.51.100.66".to_string()),
            user_agent: Set("intruder".to_string()),
            created_at: Set(now),
            expires_at: Set(now + chrono::Duration::hours(1)),
            last_activity: Set(now),
            is_active: Set(true),
            ..Default::default()
        }
        .insert(&state.db)
        .await
        .unwrap_err();
        assert!(matches!(WardenError::from(err), WardenError::Conflict(_)));

        let rows = session::Entity::find()
            .filter(session::Column::Token.eq(token.as_str()))
            .all(&state.db)
            .await
            .unwrap();
        assert_eq!(rows, vec![original]);
    }

    #[tokio::test]
    async fn test_colliding_token_is_regenerated() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use warden_core::auth::generate_session_token;

        let state = setup_state(test_config()).await;
        let admin = admin(&state).await;
        let (_, taken) = logged_in(&state, &admin).await;
        let original = session_row(&state, &taken).await;

        let calls = AtomicUsize::new(0);
        let reused = taken.clone();
        let sessions = state.sessions.clone().with_token_source(move || {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                reused.clone()
            } else {
                generate_session_token()
            }
        });

        let mut ctx = SessionContext::new();
        let fresh = sessions
            .create_session(&mut ctx, &ClientInfo::local(), admin.id, &admin.username)
            .await
            .unwrap();
        assert_ne!(fresh, taken);
        assert_eq!(ctx.token(), Some(fresh.as_str()));
        assert_eq!(session_row(&state, &taken).await, original);
        assert_eq!(session::Entity::find().all(&state.db).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_persistent_collision_applies_nothing() {
        let state = setup_state(test_config()).await;
        let admin = admin(&state).await;
        let (_, taken) = logged_in(&state, &admin).await;
        let last_login = admin_last_login(&state).await;

        let reused = taken.clone();
        let sessions = state
            .sessions
            .clone()
            .with_token_source(move || reused.clone());

        let mut ctx = SessionContext::new();
        let result = sessions
            .create_session(&mut ctx, &ClientInfo::local(), admin.id, &admin.username)
            .await;
        assert!(matches!(result, Err(warden_core::WardenError::Conflict(_))));
        assert!(!ctx.is_established());
        assert_eq!(session::Entity::find().all(&state.db).await.unwrap().len(), 1);
        assert_eq!(admin_last_login(&state).await, last_login);
    }
}

// ═══════════════════════════════════════════════════════════════
// Validation failures, each path on its own
// ═══════════════════════════════════════════════════════════════

mod validation_tests {
    use super::*;

    #[tokio::test]
    async fn test_local_inactivity_ends_session_without_store_expiry() {
        let state = setup_state(test_config()).await;
        let admin = admin(&state).await;
        let (mut ctx, token) = logged_in(&state, &admin).await;

        ctx.touch(Utc::now().naive_utc() - chrono::Duration::seconds(1801));
        assert!(
            state
                .sessions
                .validate_session(&mut ctx, &ClientInfo::local())
                .await
                .is_none()
        );
        assert!(!ctx.is_established(), "context is cleared");
        assert!(!session_row(&state, &token).await.is_active);

        let logout = audit_log::Entity::find()
            .filter(audit_log::Column::Action.eq("LOGOUT"))
            .one(&state.db)
            .await
            .unwrap();
        assert!(logout.is_some());
    }

    #[tokio::test]
    async fn test_destroyed_session_fails_validation() {
        let state = setup_state(test_config()).await;
        let admin = admin(&state).await;
        let (mut ctx, token) = logged_in(&state, &admin).await;
        let mut stale_copy = ctx.clone();

        state
            .sessions
            .destroy_session(&mut ctx, &ClientInfo::local())
            .await
            .unwrap();
        assert!(!ctx.is_established());
        assert!(!session_row(&state, &token).await.is_active);

        assert!(
            state
                .sessions
                .validate_session(&mut stale_copy, &ClientInfo::local())
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_destroy_without_context_is_noop() {
        let state = setup_state(test_config()).await;
        let mut ctx = SessionContext::new();
        state
            .sessions
            .destroy_session(&mut ctx, &ClientInfo::local())
            .await
            .unwrap();
        assert!(audit_log::Entity::find().all(&state.db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoked_session_fails_validation() {
        let state = setup_state(test_config()).await;
        let admin = admin(&state).await;
        let (mut ctx, token) = logged_in(&state, &admin).await;

        let revoked = state
            .sessions
            .revoke_session(&token, admin.id, &ClientInfo::local())
            .await
            .unwrap();
        assert!(revoked);
        assert!(
            state
                .sessions
                .validate_session(&mut ctx, &ClientInfo::local())
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_store_expiry_ends_session_despite_fresh_context() {
        let state = setup_state(test_config()).await;
        let admin = admin(&state).await;
        let (mut ctx, token) = logged_in(&state, &admin).await;

        expire_in_store(&state, &token).await;
        assert!(
            state
                .sessions
                .validate_session(&mut ctx, &ClientInfo::local())
                .await
                .is_none()
        );
        assert!(!ctx.is_established());
    }

    #[tokio::test]
    async fn test_deactivated_user_fails_validation() {
        let state = setup_state(test_config()).await;
        let admin = admin(&state).await;
        let (mut ctx, _) = logged_in(&state, &admin).await;

        user::Entity::update_many()
            .col_expr(user::Column::IsActive, Expr::value(false))
            .filter(user::Column::Id.eq(admin.id))
            .exec(&state.db)
            .await
            .unwrap();
        assert!(
            state
                .sessions
                .validate_session(&mut ctx, &ClientInfo::local())
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_validation_refreshes_activity_and_expiry() {
        let state = setup_state(test_config()).await;
        let admin = admin(&state).await;
        let (mut ctx, token) = logged_in(&state, &admin).await;

        let earlier = Utc::now().naive_utc() - chrono::Duration::minutes(10);
        session::Entity::update_many()
            .col_expr(session::Column::LastActivity, Expr::value(earlier))
            .col_expr(session::Column::ExpiresAt, Expr::value(earlier + chrono::Duration::minutes(30)))
            .filter(session::Column::Token.eq(token.as_str()))
            .exec(&state.db)
            .await
            .unwrap();

        let active = state
            .sessions
            .validate_session(&mut ctx, &ClientInfo::local())
            .await
            .unwrap();
        assert!(active.session.last_activity > earlier);
        assert!(active.session.expires_at > earlier + chrono::Duration::minutes(30));
        assert_eq!(ctx.last_activity(), Some(active.session.last_activity));
    }
}

// ═══════════════════════════════════════════════════════════════
// Listing, revocation policy and maintenance
// ═══════════════════════════════════════════════════════════════

mod listing_tests {
    use super::*;

    #[tokio::test]
    async fn test_active_sessions_exclude_expired_and_inactive() {
        let state = setup_state(test_config()).await;
        let admin = admin(&state).await;
        let bob = create_user(&state.db, "bob", "bob@example.com", "hunter22").await;

        let (_, live) = logged_in(&state, &admin).await;
        let (_, expired) = logged_in(&state, &admin).await;
        let (mut ended_ctx, ended) = logged_in(&state, &admin).await;
        let (_, bobs) = logged_in(&state, &bob).await;

        expire_in_store(&state, &expired).await;
        state
            .sessions
            .destroy_session(&mut ended_ctx, &ClientInfo::local())
            .await
            .unwrap();

        let mine = state.sessions.get_active_sessions(Some(admin.id)).await.unwrap();
        let tokens: Vec<&str> = mine.iter().map(|s| s.session_token.as_str()).collect();
        assert_eq!(tokens, vec![live.as_str()]);
        assert_eq!(mine[0].username, DEMO_USERNAME);

        let everyone = state.sessions.get_active_sessions(None).await.unwrap();
        assert_eq!(everyone.len(), 2);
        assert!(everyone.iter().any(|s| s.session_token == bobs));
        assert!(everyone.iter().all(|s| s.session_token != ended));
    }

    #[tokio::test]
    async fn test_active_sessions_newest_activity_first() {
        let state = setup_state(test_config()).await;
        let admin = admin(&state).await;
        let (_, older) = logged_in(&state, &admin).await;
        let (_, newer) = logged_in(&state, &admin).await;

        session::Entity::update_many()
            .col_expr(
                session::Column::LastActivity,
                Expr::value(Utc::now().naive_utc() - chrono::Duration::minutes(5)),
            )
            .filter(session::Column::Token.eq(older.as_str()))
            .exec(&state.db)
            .await
            .unwrap();

        let listed = state.sessions.get_active_sessions(Some(admin.id)).await.unwrap();
        assert_eq!(listed[0].session_token, newer);
        assert_eq!(listed[1].session_token, older);
    }

    #[tokio::test]
    async fn test_owner_policy_refuses_foreign_tokens() {
        let state = setup_state(test_config()).await;
        assert_eq!(state.sessions.revocation_policy(), RevocationPolicy::Owner);
        let admin = admin(&state).await;
        let bob = create_user(&state.db, "bob", "bob@example.com", "hunter22").await;
        let (_, admins_token) = logged_in(&state, &admin).await;

        let revoked = state
            .sessions
            .revoke_session(&admins_token, bob.id, &ClientInfo::local())
            .await
            .unwrap();
        assert!(!revoked);
        assert!(session_row(&state, &admins_token).await.is_active);
    }

    #[tokio::test]
    async fn test_any_policy_revokes_foreign_tokens() {
        let mut config = test_config();
        config.security.revocation_policy = RevocationPolicy::Any;
        let state = setup_state(config).await;
        let admin = admin(&state).await;
        let bob = create_user(&state.db, "bob", "bob@example.com", "hunter22").await;
        let (_, admins_token) = logged_in(&state, &admin).await;

        let revoked = state
            .sessions
            .revoke_session(&admins_token, bob.id, &ClientInfo::local())
            .await
            .unwrap();
        assert!(revoked);
        assert!(!session_row(&state, &admins_token).await.is_active);

        let entry = audit_log::Entity::find()
            .filter(audit_log::Column::Action.eq("SESSION_REVOKED"))
            .one(&state.db)
            .await
            .unwrap()
            .expect("revocation audited");
        assert_eq!(entry.user_id, Some(bob.id), "attributed to the acting user");
        assert!(!entry.details.unwrap_or_default().contains(&admins_token));

        let again = state
            .sessions
            .revoke_session(&admins_token, bob.id, &ClientInfo::local())
            .await
            .unwrap();
        assert!(!again, "already inactive");
    }

    #[tokio::test]
    async fn test_cleanup_deactivates_only_expired() {
        let state = setup_state(test_config()).await;
        let admin = admin(&state).await;
        let (_, keep) = logged_in(&state, &admin).await;
        let (_, expire) = logged_in(&state, &admin).await;
        expire_in_store(&state, &expire).await;

        assert_eq!(state.sessions.clean_expired_sessions().await.unwrap(), 1);
        assert_eq!(state.sessions.clean_expired_sessions().await.unwrap(), 0);
        assert!(session_row(&state, &keep).await.is_active);
        assert!(!session_row(&state, &expire).await.is_active);
    }

    #[tokio::test]
    async fn test_probabilistic_cleanup_respects_probability() {
        let mut never = test_config();
        never.security.session_cleanup_probability = 0.0;
        let state = setup_state(never).await;
        assert_eq!(state.sessions.maybe_clean_expired_sessions().await, None);

        let mut always = test_config();
        always.security.session_cleanup_probability = 1.0;
        let state = setup_state(always).await;
        assert_eq!(state.sessions.maybe_clean_expired_sessions().await, Some(0));
    }

    #[tokio::test]
    async fn test_stats_count_live_sessions_and_users() {
        let state = setup_state(test_config()).await;
        let admin = admin(&state).await;
        let bob = create_user(&state.db, "bob", "bob@example.com", "hunter22").await;
        logged_in(&state, &admin).await;
        logged_in(&state, &admin).await;
        let (_, bobs) = logged_in(&state, &bob).await;
        expire_in_store(&state, &bobs).await;

        let stats = state.sessions.session_stats().await;
        assert_eq!(stats.active_sessions, 2);
        assert_eq!(stats.unique_users, 1);
    }
}
