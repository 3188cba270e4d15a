use super::{
    build_account_store, AccountStore, AccountStoreBackend, AccountStoreError, SqliteAccountStore,
};
use crate::connector::{AppMetadata, ConnectedAccount};
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn account(id: &str, user: &str, app: &str) -> ConnectedAccount {
    ConnectedAccount {
        id: id.to_string(),
        external_user_id: user.to_string(),
        app_slug: app.to_string(),
        name: Some(format!("{id}@example.com")),
        healthy: true,
        dead: None,
        created_at: Some(at(0)),
        updated_at: Some(at(10)),
        app: AppMetadata {
            name: Some(app.to_string()),
            auth_type: Some("oauth".to_string()),
            categories: vec!["Email".to_string()],
        },
        credentials: None,
    }
}

fn store(temp: &TempDir) -> SqliteAccountStore {
    SqliteAccountStore::new(temp.path().join("nested").join("accounts.db")).unwrap()
}

#[test]
fn replace_then_list_returns_exact_set_in_order() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);
    let accounts = vec![
        account("apn_b", "user-1", "gmail"),
        account("apn_a", "user-1", "notion"),
        account("apn_c", "user-1", "gmail"),
    ];

    let summary = store
        .replace_user_accounts("user-1", &accounts, at(100))
        .unwrap();
    assert_eq!(summary.upserted, 3);
    assert_eq!(summary.removed, 0);

    let cached = store.list_user_accounts("user-1").unwrap();
    assert_eq!(cached, accounts);
}

#[test]
fn replace_removes_accounts_missing_from_remote() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);
    store
        .replace_user_accounts(
            "user-1",
            &[
                account("apn_1", "user-1", "gmail"),
                account("apn_2", "user-1", "gmail"),
            ],
            at(100),
        )
        .unwrap();

    let mut renamed = account("apn_2", "user-1", "gmail");
    renamed.name = Some("renamed".to_string());
    renamed.healthy = false;
    renamed.dead = Some(true);
    let summary = store
        .replace_user_accounts("user-1", &[renamed.clone()], at(200))
        .unwrap();
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.upserted, 1);

    let cached = store.list_user_accounts("user-1").unwrap();
    assert_eq!(cached, vec![renamed]);
}

#[test]
fn replace_only_touches_the_given_user() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);
    store
        .replace_user_accounts("user-1", &[account("apn_1", "user-1", "gmail")], at(100))
        .unwrap();
    store
        .replace_user_accounts("user-2", &[account("apn_2", "user-2", "gmail")], at(100))
        .unwrap();

    store.replace_user_accounts("user-1", &[], at(200)).unwrap();

    assert!(store.list_user_accounts("user-1").unwrap().is_empty());
    assert_eq!(store.list_user_accounts("user-2").unwrap().len(), 1);
}

#[test]
fn reapplying_the_same_sync_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);
    let accounts = vec![
        account("apn_1", "user-1", "gmail"),
        account("apn_2", "user-1", "notion"),
    ];

    store
        .replace_user_accounts("user-1", &accounts, at(100))
        .unwrap();
    let first = store.list_user_accounts("user-1").unwrap();
    let summary = store
        .replace_user_accounts("user-1", &accounts, at(100))
        .unwrap();
    let second = store.list_user_accounts("user-1").unwrap();

    assert_eq!(summary.removed, 0);
    assert_eq!(first, second);
}

#[test]
fn sync_record_distinguishes_never_synced_from_empty() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);

    assert!(store.sync_record("user-1").unwrap().is_none());
    assert!(store.list_user_accounts("user-1").unwrap().is_empty());

    store.replace_user_accounts("user-1", &[], at(300)).unwrap();
    let record = store.sync_record("user-1").unwrap().unwrap();
    assert_eq!(record.external_user_id, "user-1");
    assert_eq!(record.synced_at, at(300));
    assert_eq!(record.account_count, 0);
}

#[test]
fn foreign_accounts_are_rejected_without_writing() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);
    store
        .replace_user_accounts("user-1", &[account("apn_1", "user-1", "gmail")], at(100))
        .unwrap();

    let err = store
        .replace_user_accounts(
            "user-1",
            &[
                account("apn_9", "user-1", "gmail"),
                account("apn_x", "someone-else", "gmail"),
            ],
            at(200),
        )
        .unwrap_err();
    match err {
        AccountStoreError::ForeignAccount {
            account_id, owner, ..
        } => {
            assert_eq!(account_id, "apn_x");
            assert_eq!(owner, "someone-else");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let cached = store.list_user_accounts("user-1").unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].id, "apn_1");
    assert_eq!(store.sync_record("user-1").unwrap().unwrap().synced_at, at(100));
}

#[test]
fn credentials_are_never_cached() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);
    let mut with_secret = account("apn_1", "user-1", "gmail");
    with_secret.credentials = Some(serde_json::json!({"oauth_access_token": "secret"}));

    store
        .replace_user_accounts("user-1", &[with_secret], at(100))
        .unwrap();

    let cached = store.list_user_accounts("user-1").unwrap();
    assert!(cached[0].credentials.is_none());
}

#[test]
fn absent_timestamps_round_trip_and_resync_is_stable() {
    let temp = TempDir::new().unwrap();
    let store = store(&temp);
    let mut undated = account("apn_1", "user-1", "gmail");
    undated.created_at = None;
    undated.updated_at = None;
    let mut precise = account("apn_2", "user-1", "gmail");
    precise.created_at = Some(Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap());
    let remote = vec![undated, precise];

    store.replace_user_accounts("user-1", &remote, at(100)).unwrap();
    let first = store.list_user_accounts("user-1").unwrap();
    store.replace_user_accounts("user-1", &remote, at(200)).unwrap();
    let second = store.list_user_accounts("user-1").unwrap();

    assert_eq!(first, remote);
    assert_eq!(second, remote);
}

#[test]
fn build_account_store_opens_sqlite_backend() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("accounts.db");
    let store = build_account_store(&AccountStoreBackend::Sqlite { path: path.clone() }).unwrap();

    store
        .replace_user_accounts("user-1", &[account("apn_1", "user-1", "gmail")], at(100))
        .unwrap();
    assert!(path.exists());

    // A second handle over the same file sees the committed rows.
    let reopened = SqliteAccountStore::new(path).unwrap();
    assert_eq!(reopened.list_user_accounts("user-1").unwrap().len(), 1);
}
