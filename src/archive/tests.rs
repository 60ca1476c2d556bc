use super::*;
use std::time::Duration;

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, crate::types::DATE_FORMAT).unwrap()
}

fn quick_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

fn pdf(date: &str) -> RawContent {
    RawContent::new(
        d(date),
        ContentFormat::Pdf,
        Bytes::from_static(b"%PDF-1.4\n/Type /Page\n%%EOF\n"),
    )
    .unwrap()
}

fn stores() -> (Arc<MemoryProvider>, Arc<MemoryProvider>, ArchiveStore) {
    let primary = Arc::new(MemoryProvider::new("primary"));
    let secondary = Arc::new(MemoryProvider::new("secondary"));
    let store = ArchiveStore::new(primary.clone(), Some(secondary.clone()), quick_retry());
    (primary, secondary, store)
}

#[tokio::test]
async fn store_writes_primary_with_deterministic_key() {
    let (primary, secondary, store) = stores();

    let entry = store.store(d("2024-03-01"), &pdf("2024-03-01")).await.unwrap();

    assert_eq!(entry.storage_key, "2024-03-01.pdf");
    assert_eq!(entry.provider, ProviderRole::Primary);
    assert_eq!(entry.mime_type, "application/pdf");
    assert_eq!(entry.public_url, "memory://primary/2024-03-01.pdf");
    assert_eq!(entry.sha256.as_deref(), Some(pdf("2024-03-01").sha256.as_str()));
    assert_eq!(primary.keys(), vec!["2024-03-01.pdf"]);
    assert!(secondary.keys().is_empty());
}

#[tokio::test]
async fn storing_the_same_date_twice_keeps_one_entry() {
    let (primary, _, store) = stores();

    store.store(d("2024-03-01"), &pdf("2024-03-01")).await.unwrap();
    store.store(d("2024-03-01"), &pdf("2024-03-01")).await.unwrap();

    assert_eq!(primary.keys(), vec!["2024-03-01.pdf"]);
    let listed = store.list(7, d("2024-03-01")).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn format_change_replaces_previous_object() {
    let (primary, _, store) = stores();
    primary.insert("2024-03-01.html", "<html></html>", "text/html");

    store.store(d("2024-03-01"), &pdf("2024-03-01")).await.unwrap();

    assert_eq!(primary.keys(), vec!["2024-03-01.pdf"]);
}

#[tokio::test]
async fn transient_primary_failure_is_retried_in_place() {
    let (primary, secondary, store) = stores();
    primary.fail_next_puts(ScriptedFailure::Retry, 1);

    let entry = store.store(d("2024-03-01"), &pdf("2024-03-01")).await.unwrap();

    assert_eq!(entry.provider, ProviderRole::Primary);
    assert_eq!(primary.put_calls(), 2);
    assert_eq!(secondary.put_calls(), 0);
}

#[tokio::test]
async fn unavailable_primary_fails_over_to_secondary() {
    let (primary, secondary, store) = stores();
    primary.fail_puts(ScriptedFailure::Retry);
    let content = pdf("2024-03-01");

    let entry = store.store(d("2024-03-01"), &content).await.unwrap();

    assert_eq!(entry.provider, ProviderRole::Secondary);
    assert_eq!(entry.public_url, "memory://secondary/2024-03-01.pdf");
    assert_eq!(primary.put_calls(), 3, "first try plus two retries");
    assert_eq!(
        secondary.get("2024-03-01.pdf").unwrap().bytes,
        content.bytes,
        "secondary receives the same payload"
    );
}

#[tokio::test]
async fn permission_denied_on_primary_does_not_fail_over() {
    let (primary, secondary, store) = stores();
    primary.fail_puts(ScriptedFailure::Fatal);

    let err = store
        .store(d("2024-03-01"), &pdf("2024-03-01"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StoreError::PermissionDenied {
            provider: ProviderRole::Primary,
            ..
        }
    ));
    assert_eq!(primary.put_calls(), 1);
    assert_eq!(secondary.put_calls(), 0);
}

#[tokio::test]
async fn both_providers_unavailable_surfaces_secondary_failure() {
    let (primary, secondary, store) = stores();
    primary.fail_puts(ScriptedFailure::Retry);
    secondary.fail_puts(ScriptedFailure::Retry);

    let err = store
        .store(d("2024-03-01"), &pdf("2024-03-01"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StoreError::ProviderUnavailable {
            provider: ProviderRole::Secondary,
            ..
        }
    ));
}

#[tokio::test]
async fn no_secondary_surfaces_primary_failure() {
    let primary = Arc::new(MemoryProvider::new("primary"));
    primary.fail_puts(ScriptedFailure::Retry);
    let store = ArchiveStore::new(primary, None, quick_retry());

    let err = store
        .store(d("2024-03-01"), &pdf("2024-03-01"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StoreError::ProviderUnavailable {
            provider: ProviderRole::Primary,
            ..
        }
    ));
}

#[tokio::test]
async fn list_is_windowed_deduplicated_and_newest_first() {
    let (primary, secondary, store) = stores();
    for date in ["2024-02-20", "2024-02-28", "2024-03-01"] {
        primary.insert(format!("{date}.pdf"), "x", "application/pdf");
    }
    secondary.insert("2024-03-01.pdf", "x", "application/pdf");
    secondary.insert("2024-02-29.html", "x", "text/html");
    secondary.insert("notes.txt", "x", "text/plain");
    primary.insert("2024-03-02.pdf", "x", "application/pdf");

    let entries = store.list(7, d("2024-03-01")).await.unwrap();

    let summary: Vec<_> = entries
        .iter()
        .map(|e| (e.storage_key.as_str(), e.provider))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("2024-03-01.pdf", ProviderRole::Primary),
            ("2024-02-29.html", ProviderRole::Secondary),
            ("2024-02-28.pdf", ProviderRole::Primary),
        ]
    );
    assert_eq!(entries[1].mime_type, "text/html; charset=utf-8");
}

#[tokio::test]
async fn list_survives_one_failing_listing() {
    let (primary, secondary, store) = stores();
    primary.fail_listing(ScriptedFailure::Retry);
    secondary.insert("2024-03-01.pdf", "x", "application/pdf");

    let entries = store.list(7, d("2024-03-01")).await.unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].provider, ProviderRole::Secondary);
}

#[tokio::test]
async fn list_skips_entry_whose_url_cannot_be_signed() {
    let (primary, _, store) = stores();
    primary.insert("2024-03-01.pdf", "x", "application/pdf");
    primary.insert("2024-02-29.pdf", "x", "application/pdf");
    primary.fail_public_url("2024-02-29.pdf", ScriptedFailure::Fatal);

    let entries = store.list(7, d("2024-03-01")).await.unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].storage_key, "2024-03-01.pdf");
    assert_eq!(entries[0].public_url, "memory://primary/2024-03-01.pdf");
}

#[tokio::test]
async fn find_returns_entry_for_date_only() {
    let (primary, _, store) = stores();
    primary.insert("2024-02-29.pdf", "x", "application/pdf");

    assert!(store.find(d("2024-03-01")).await.unwrap().is_none());
    let found = store.find(d("2024-02-29")).await.unwrap().unwrap();
    assert_eq!(found.storage_key, "2024-02-29.pdf");
}

#[tokio::test]
async fn purge_removes_only_entries_before_cutoff_on_every_provider() {
    let (primary, secondary, store) = stores();
    for day in 20..=29 {
        primary.insert(format!("2024-02-{day}.pdf"), "x", "application/pdf");
    }
    primary.insert("2024-03-01.pdf", "x", "application/pdf");
    secondary.insert("2024-02-21.pdf", "x", "application/pdf");
    secondary.insert("2024-02-25.pdf", "x", "application/pdf");
    secondary.insert("readme.txt", "x", "text/plain");

    let cutoff = retention_cutoff(d("2024-03-01"), 7);
    let report = store.purge_older_than(cutoff).await.unwrap();

    assert_eq!(cutoff, d("2024-02-24"));
    assert_eq!(report.removed, 5);
    assert!(report.is_clean());
    assert_eq!(
        primary.keys(),
        vec![
            "2024-02-24.pdf",
            "2024-02-25.pdf",
            "2024-02-26.pdf",
            "2024-02-27.pdf",
            "2024-02-28.pdf",
            "2024-02-29.pdf",
            "2024-03-01.pdf",
        ]
    );
    assert_eq!(secondary.keys(), vec!["2024-02-25.pdf", "readme.txt"]);
}

#[tokio::test]
async fn purge_collects_individual_failures_and_continues() {
    let (primary, _, store) = stores();
    for date in ["2024-02-20", "2024-02-21", "2024-02-22"] {
        primary.insert(format!("{date}.pdf"), "x", "application/pdf");
    }
    primary.fail_delete("2024-02-21.pdf", ScriptedFailure::Fatal);

    let report = store.purge_older_than(d("2024-02-24")).await.unwrap();

    assert_eq!(report.removed, 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].storage_key, "2024-02-21.pdf");
    assert_eq!(report.failed[0].provider, ProviderRole::Primary);
    assert_eq!(primary.keys(), vec!["2024-02-21.pdf"]);
}

#[tokio::test]
async fn purge_records_failed_listing_and_purges_the_rest() {
    let (primary, secondary, store) = stores();
    secondary.fail_listing(ScriptedFailure::Fatal);
    primary.insert("2024-02-01.pdf", "x", "application/pdf");

    let report = store.purge_older_than(d("2024-02-24")).await.unwrap();

    assert_eq!(report.removed, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].storage_key, "*");
    assert_eq!(report.failed[0].provider, ProviderRole::Secondary);
}

#[tokio::test]
async fn purge_fails_when_nothing_can_be_listed() {
    let primary = Arc::new(MemoryProvider::new("primary"));
    primary.fail_listing(ScriptedFailure::Fatal);
    let store = ArchiveStore::new(primary, None, quick_retry());

    let err = store.purge_older_than(d("2024-02-24")).await.unwrap_err();

    assert!(matches!(err, StoreError::PermissionDenied { .. }));
}

#[tokio::test]
async fn dry_run_writes_and_deletes_nothing() {
    let primary = Arc::new(MemoryProvider::new("primary"));
    primary.insert("2024-01-01.pdf", "x", "application/pdf");
    let store = ArchiveStore::new(primary.clone(), None, quick_retry()).with_dry_run(true);

    let entry = store.store(d("2024-03-01"), &pdf("2024-03-01")).await.unwrap();
    let report = store.purge_older_than(d("2024-02-24")).await.unwrap();

    assert_eq!(entry.storage_key, "2024-03-01.pdf");
    assert_eq!(entry.provider, ProviderRole::Primary);
    assert_eq!(report.removed, 0);
    assert_eq!(primary.put_calls(), 0);
    assert_eq!(primary.delete_calls(), 0);
    assert_eq!(primary.keys(), vec!["2024-01-01.pdf"]);
}

#[test]
fn outcome_maps_to_store_errors() {
    assert_eq!(ProviderOutcome::Success(3).into_result(ProviderRole::Primary).unwrap(), 3);
    assert!(matches!(
        ProviderOutcome::<()>::Retry("x".into()).into_result(ProviderRole::Secondary),
        Err(StoreError::ProviderUnavailable {
            provider: ProviderRole::Secondary,
            ..
        })
    ));
    assert!(matches!(
        ProviderOutcome::<()>::Fatal("x".into()).into_result(ProviderRole::Primary),
        Err(StoreError::PermissionDenied { .. })
    ));
}
