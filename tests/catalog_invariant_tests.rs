//! Catalogue invariant tests against the in-memory catalogue contract:
//! latest-flag uniqueness, remote-URL uniqueness, version ceilings, and
//! status transitions behave the same way the store-backed service does.

mod common;

use amphora_registry::error::AppError;
use amphora_registry::models::{ArtifactKind, ArtifactStatus, Remote};
use amphora_registry::services::catalog::Catalog;
use common::{descriptor, InMemoryCatalog};

#[tokio::test]
async fn publish_marks_first_version_latest() {
    let catalog = InMemoryCatalog::new();
    let stored = catalog
        .publish(ArtifactKind::Server, descriptor("io.example/echo", "1.0.0"))
        .await
        .unwrap();

    assert!(stored.meta.is_latest);
    assert_eq!(stored.meta.status, ArtifactStatus::Active);
    assert_eq!(stored.meta.published_at, stored.meta.updated_at);
}

#[tokio::test]
async fn supersession_moves_latest_flag() {
    let catalog = InMemoryCatalog::new();
    catalog
        .publish(ArtifactKind::Server, descriptor("io.example/echo", "1.0.0"))
        .await
        .unwrap();
    catalog
        .publish(ArtifactKind::Server, descriptor("io.example/echo", "1.1.0"))
        .await
        .unwrap();

    let latest = catalog
        .get_latest(ArtifactKind::Server, "io.example/echo")
        .await
        .unwrap();
    assert_eq!(latest.descriptor.version, "1.1.0");

    let all = catalog
        .get_all_versions(ArtifactKind::Server, "io.example/echo")
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all.iter().filter(|v| v.meta.is_latest).count(), 1);
}

#[tokio::test]
async fn older_semver_published_later_does_not_supersede() {
    let catalog = InMemoryCatalog::new();
    catalog
        .publish(ArtifactKind::Server, descriptor("io.example/echo", "1.1.0"))
        .await
        .unwrap();
    catalog
        .publish(ArtifactKind::Server, descriptor("io.example/echo", "1.0.1"))
        .await
        .unwrap();

    let latest = catalog
        .get_latest(ArtifactKind::Server, "io.example/echo")
        .await
        .unwrap();
    assert_eq!(latest.descriptor.version, "1.1.0");
}

#[tokio::test]
async fn duplicate_version_is_rejected() {
    let catalog = InMemoryCatalog::new();
    catalog
        .publish(ArtifactKind::Server, descriptor("io.example/echo", "1.0.0"))
        .await
        .unwrap();
    let err = catalog
        .publish(ArtifactKind::Server, descriptor("io.example/echo", "1.0.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidVersion(_)));
}

#[tokio::test]
async fn duplicate_remote_url_across_names_is_rejected() {
    let catalog = InMemoryCatalog::new();

    let mut first = descriptor("ns.one/x", "1.0.0");
    first.remotes = vec![Remote {
        url: "https://r.example/mcp".into(),
        ..Default::default()
    }];
    catalog.publish(ArtifactKind::Server, first).await.unwrap();

    // Same name may reuse its own URL across versions.
    let mut same_name = descriptor("ns.one/x", "1.1.0");
    same_name.remotes = vec![Remote {
        url: "https://r.example/mcp".into(),
        ..Default::default()
    }];
    catalog
        .publish(ArtifactKind::Server, same_name)
        .await
        .unwrap();

    // A different name claiming the URL fails.
    let mut thief = descriptor("ns.two/y", "1.0.0");
    thief.remotes = vec![Remote {
        url: "https://r.example/mcp".into(),
        ..Default::default()
    }];
    let err = catalog
        .publish(ArtifactKind::Server, thief)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationFailed(_)));

    // The namespace is per kind: a skill may claim the same URL.
    let mut skill = descriptor("ns.two/y", "1.0.0");
    skill.remotes = vec![Remote {
        url: "https://r.example/mcp".into(),
        ..Default::default()
    }];
    catalog.publish(ArtifactKind::Skill, skill).await.unwrap();
}

#[tokio::test]
async fn status_machine_allows_only_declared_transitions() {
    let catalog = InMemoryCatalog::new();
    catalog
        .publish(ArtifactKind::Agent, descriptor("io.example/agent", "1.0.0"))
        .await
        .unwrap();

    // active -> deprecated
    let updated = catalog
        .update(
            ArtifactKind::Agent,
            "io.example/agent",
            "1.0.0",
            descriptor("io.example/agent", "1.0.0"),
            Some(ArtifactStatus::Deprecated),
        )
        .await
        .unwrap();
    assert_eq!(updated.meta.status, ArtifactStatus::Deprecated);
    // Deprecation does not strip the latest flag.
    assert!(updated.meta.is_latest);

    // deprecated -> active is not allowed
    let err = catalog
        .update(
            ArtifactKind::Agent,
            "io.example/agent",
            "1.0.0",
            descriptor("io.example/agent", "1.0.0"),
            Some(ArtifactStatus::Active),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // deprecated -> deleted is allowed, and deleted rows stay editable
    catalog
        .update(
            ArtifactKind::Agent,
            "io.example/agent",
            "1.0.0",
            descriptor("io.example/agent", "1.0.0"),
            Some(ArtifactStatus::Deleted),
        )
        .await
        .unwrap();
    let after_delete = catalog
        .update(
            ArtifactKind::Agent,
            "io.example/agent",
            "1.0.0",
            descriptor("io.example/agent", "1.0.0"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(after_delete.meta.status, ArtifactStatus::Deleted);
}

#[tokio::test]
async fn kinds_are_disjoint_namespaces() {
    let catalog = InMemoryCatalog::new();
    for kind in ArtifactKind::ALL {
        catalog
            .publish(kind, descriptor("shared.ns/name", "1.0.0"))
            .await
            .unwrap();
    }
    for kind in ArtifactKind::ALL {
        assert_eq!(catalog.row_count(kind), 1);
    }
}

#[tokio::test]
async fn malformed_names_never_persist() {
    let catalog = InMemoryCatalog::new();
    for bad in ["noslash", "/x", "a b/c", "a/b/c"] {
        let err = catalog
            .publish(ArtifactKind::Server, descriptor(bad, "1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationFailed(_)), "{bad}");
    }
    assert_eq!(catalog.row_count(ArtifactKind::Server), 0);
}
