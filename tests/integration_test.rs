use access_key_gate::{
    config::KeyConfig,
    database::Database,
    errors::ApiError,
    models::NewAccessKey,
    security::KeyCodeGenerator,
    service::AccessKeyService,
    UNLIMITED_USES,
};
use chrono::{Duration, Utc};
use std::fs;
use std::path::Path;

fn test_service(name: &str) -> AccessKeyService {
    let test_db_dir = "tests/test_db";
    if !Path::new(test_db_dir).exists() {
        fs::create_dir_all(test_db_dir).expect("Failed to create test_db directory");
    }

    let db_path = format!("{}/{}.sqlite", test_db_dir, name);
    let _ = fs::remove_file(&db_path);

    let db = Database::new(&db_path).expect("Failed to create test database");
    AccessKeyService::new(db, &KeyConfig::default())
}

#[tokio::test]
async fn test_quota_scenario() {
    let service = test_service("it_quota_scenario");
    let key = service.issue_key("two uses", 2, None).expect("Failed to issue key");

    for _ in 0..2 {
        let validated = service
            .validate(&key.key_code, Utc::now())
            .expect("Key should be valid");
        service.record(Some(validated.id), "10.0.0.1", "hello", true, None);
    }

    let result = service.validate(&key.key_code, Utc::now());
    assert!(matches!(result, Err(ApiError::QuotaExhausted { key_id }) if key_id == key.id));
}

#[tokio::test]
async fn test_used_count_never_exceeds_quota() {
    let service = test_service("it_used_count_cap");
    let key = service.issue_key("capped", 2, None).unwrap();

    for _ in 0..5 {
        service.record(Some(key.id), "10.0.0.1", "hello", true, None);
    }

    let stored = service.database().get_access_key(key.id).unwrap().unwrap();
    assert_eq!(stored.used_count, 2);
    // Every attempt is still in the ledger.
    assert_eq!(service.logs_for_key(key.id).unwrap().len(), 5);
}

#[tokio::test]
async fn test_inactive_key_rejected() {
    let service = test_service("it_inactive_rejected");
    let key = service.issue_key("soon retired", UNLIMITED_USES, Some(30)).unwrap();

    service.deactivate_key(key.id).expect("Failed to deactivate");

    let result = service.validate(&key.key_code, Utc::now());
    assert!(matches!(result, Err(ApiError::KeyNotFound)));
}

#[tokio::test]
async fn test_expired_key_rejected_despite_quota() {
    let service = test_service("it_expired_rejected");
    let key = service
        .database()
        .create_access_key(&NewAccessKey {
            key_code: KeyCodeGenerator::default().generate(),
            name: "yesterday".to_string(),
            max_uses: Some(10),
            expires_at: Some(Utc::now() - Duration::days(1)),
        })
        .unwrap();

    let result = service.validate(&key.key_code, Utc::now());
    assert!(matches!(result, Err(ApiError::KeyExpired { key_id }) if key_id == key.id));
}

#[tokio::test]
async fn test_key_expires_after_its_lifetime() {
    let service = test_service("it_expiry_window");
    let issued_at = Utc::now();
    let key = service.issue_key_at("weekly", UNLIMITED_USES, Some(7), issued_at).unwrap();

    assert_eq!(key.expires_at, Some(issued_at + Duration::days(7)));
    assert!(service.validate(&key.key_code, issued_at + Duration::days(6)).is_ok());
    assert!(matches!(
        service.validate(&key.key_code, issued_at + Duration::days(7)),
        Err(ApiError::KeyExpired { .. })
    ));
}

#[tokio::test]
async fn test_unlimited_key_never_exhausted() {
    let service = test_service("it_unlimited");

    for max_uses in [UNLIMITED_USES, 0] {
        let key = service.issue_key("unlimited", max_uses, None).unwrap();
        assert_eq!(key.max_uses, None);

        for _ in 0..30 {
            service.record(Some(key.id), "10.0.0.1", "", true, None);
        }

        let validated = service.validate(&key.key_code, Utc::now()).expect("Unlimited key should stay valid");
        assert_eq!(validated.used_count, 30);
    }
}

#[tokio::test]
async fn test_non_positive_lifetime_never_expires() {
    let service = test_service("it_no_expiry");

    for days in [None, Some(0), Some(-1)] {
        let key = service.issue_key("forever", 5, days).unwrap();
        assert_eq!(key.expires_at, None);
    }
}

#[tokio::test]
async fn test_record_success_increments_once() {
    let service = test_service("it_record_success");
    let key = service.issue_key("recorded", 10, None).unwrap();

    service.record(Some(key.id), "192.0.2.4", "payload", true, None);

    let stored = service.database().get_access_key(key.id).unwrap().unwrap();
    assert_eq!(stored.used_count, 1);
    assert!(stored.updated_at >= key.updated_at);

    let logs = service.logs_for_key(key.id).unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].success);
    assert_eq!(logs[0].user_ip.as_deref(), Some("192.0.2.4"));
    assert_eq!(logs[0].request_text.as_deref(), Some("payload"));
    assert_eq!(logs[0].error_msg, None);
}

#[tokio::test]
async fn test_record_failure_only_logs() {
    let service = test_service("it_record_failure");
    let key = service.issue_key("failing", 10, None).unwrap();

    service.record(Some(key.id), "192.0.2.4", "payload", false, Some("Access key expired"));

    let stored = service.database().get_access_key(key.id).unwrap().unwrap();
    assert_eq!(stored.used_count, 0);

    let logs = service.logs_for_key(key.id).unwrap();
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].success);
    assert_eq!(logs[0].error_msg.as_deref(), Some("Access key expired"));
}

#[tokio::test]
async fn test_record_truncates_request_text() {
    let service = test_service("it_record_truncate");
    let key = service.issue_key("chatty", UNLIMITED_USES, None).unwrap();

    service.record(Some(key.id), "192.0.2.4", &"x".repeat(500), true, None);

    let logs = service.logs_for_key(key.id).unwrap();
    assert_eq!(logs[0].request_text.as_deref().map(|t| t.chars().count()), Some(100));
}

#[tokio::test]
async fn test_issue_then_validate_round_trip() {
    let service = test_service("it_round_trip");
    let issued = service.issue_key("round trip", 3, Some(1)).unwrap();

    assert!(issued.key_code.starts_with("sk-"));
    assert_eq!(issued.used_count, 0);
    assert!(issued.is_active);

    let validated = service.validate(&issued.key_code, Utc::now()).unwrap();
    assert_eq!(validated, issued);
}

#[tokio::test]
async fn test_malformed_and_unknown_codes_not_found() {
    let service = test_service("it_not_found");

    assert!(matches!(service.validate("", Utc::now()), Err(ApiError::KeyNotFound)));
    assert!(matches!(service.validate("sk-nope", Utc::now()), Err(ApiError::KeyNotFound)));

    // Well-formed but never issued.
    let stray = KeyCodeGenerator::default().generate();
    assert!(matches!(service.validate(&stray, Utc::now()), Err(ApiError::KeyNotFound)));
}

#[tokio::test]
async fn test_admin_operation_errors() {
    let service = test_service("it_admin_errors");

    assert!(matches!(
        service.issue_key("   ", 1, None),
        Err(ApiError::InvalidRequest(_))
    ));
    assert!(matches!(service.deactivate_key(42), Err(ApiError::UnknownKey(42))));
}

#[tokio::test]
async fn test_keys_stay_valid_after_prefix_change() {
    let service = test_service("it_prefix_change");
    let key = service.issue_key("legacy prefix", UNLIMITED_USES, None).unwrap();

    let renamed = AccessKeyService::new(
        service.database().clone(),
        &KeyConfig {
            prefix: "ak_".to_string(),
            ..KeyConfig::default()
        },
    );

    let validated = renamed
        .validate(&key.key_code, Utc::now())
        .expect("Stored active key should survive a prefix change");
    assert_eq!(validated.id, key.id);

    let fresh = renamed.issue_key("new prefix", UNLIMITED_USES, None).unwrap();
    assert!(fresh.key_code.starts_with("ak_"));
    assert!(service.validate(&fresh.key_code, Utc::now()).is_ok());
}

#[tokio::test]
async fn test_verify_books_unknown_codes_without_key() {
    let service = test_service("it_verify_unresolved");
    let key = service.issue_key("known", 1, None).unwrap();

    let stray = KeyCodeGenerator::default().generate();
    assert!(matches!(
        service.verify(&stray, "10.0.0.1", "hi", Utc::now()),
        Err(ApiError::KeyNotFound)
    ));
    assert!(service.verify(&key.key_code, "10.0.0.1", "hi", Utc::now()).is_ok());
    assert!(matches!(
        service.verify(&key.key_code, "10.0.0.1", "hi", Utc::now()),
        Err(ApiError::QuotaExhausted { .. })
    ));

    assert_eq!(service.database().count_usage_logs(None).unwrap(), 1);
    assert_eq!(service.database().count_usage_logs(Some(key.id)).unwrap(), 2);
    assert_eq!(service.database().get_access_key(key.id).unwrap().unwrap().used_count, 1);
}
