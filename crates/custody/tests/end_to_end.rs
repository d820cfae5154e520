//! The full ingest → group → seal → export → verify path on disk.

mod common;

use std::fs;

use common::*;
use custody::core::{
    verify_statement, EventKind, LedgerEntry, LedgerRange, OffsetMetadata, PackageFault,
};
use custody::{CustodyError, Package, PackageDir};

#[tokio::test]
async fn ingest_seal_export_verify() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let custody = open(&dir.path().join("vault"));

    // Ingest the same bytes twice.
    let d1 = ingest(&custody, b"evidence-1", "a.txt").await;
    let again = ingest(&custody, b"evidence-1", "a.txt").await;
    assert_eq!(d1, again);
    assert_eq!(custody.ledger().count().await.unwrap(), 2);

    // Group, add, seal.
    let coordinator = custody.coordinator();
    let g1 = coordinator.create_group("g1", &clerk()).await.unwrap().group_id;
    coordinator
        .add_member(g1, d1, OffsetMetadata::new(0).with_label("cam-1"), &clerk())
        .await
        .unwrap();
    let sealed = coordinator.seal(g1, &clerk()).await.unwrap();
    assert_eq!(sealed.members().len(), 1);

    let kinds: Vec<EventKind> = custody
        .ledger()
        .entries(1, 10)
        .await
        .unwrap()
        .iter()
        .map(|e| e.event_kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::Ingest,
            EventKind::IngestDuplicateDetected,
            EventKind::GroupCreated,
            EventKind::GroupSealed,
        ]
    );

    // Export twice with the same generated_at.
    let range = LedgerRange::new(1, 3).unwrap();
    let request = || {
        custody::ExportRequest::new([d1], range, t(), examiner()).with_groups([g1])
    };
    let first = custody.export(request()).await.unwrap();
    let second = custody.export(request()).await.unwrap();
    assert_eq!(first.package_hash(), second.package_hash());
    assert_eq!(first.manifest_id(), second.manifest_id());

    // Each export is recorded after the fact and lies outside its own slice.
    let exported: Vec<LedgerEntry> = custody.ledger().entries(5, 6).await.unwrap();
    assert!(exported.iter().all(|e| e.event_kind == EventKind::Exported));
    assert!(exported.iter().all(|e| e.subject_digest == first.manifest_id()));
    assert_eq!(
        exported[0].detail.as_deref(),
        Some(format!("package_hash={}", first.package_hash()).as_str())
    );
    assert!(custody.ledger().verify_chain(1, 6).await.unwrap().valid);

    // Package contents.
    assert_eq!(first.object(&d1).map(|b| b.as_ref()), Some(&b"evidence-1"[..]));
    let slice = first.ledger_entries().unwrap();
    assert_eq!(slice.len(), 3);
    assert_eq!(slice[0].sequence_number, 1);
    let groups = first.groups().unwrap();
    assert_eq!(groups.len(), 1);
    assert!(groups[0].is_sealed);
    assert_eq!(groups[0].snapshot_digest, Some(sealed.snapshot_digest()));
    let statement = first.statement().unwrap().unwrap();
    assert!(verify_statement(statement).unwrap().is_valid());
    assert!(statement.contains(&d1.to_hex()));

    // Write, read back, verify with no access to the store.
    let target = dir.path().join("out").join("case-1");
    first.write_to(&target).unwrap();
    let read = Package::read_from(&target).unwrap();
    assert_eq!(read, first);
    let report = read.verify().unwrap();
    assert!(report.is_valid(), "{:?}", report.faults);
}

#[tokio::test]
async fn tampered_package_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let custody = open(&dir.path().join("vault"));
    let d1 = ingest(&custody, b"evidence-1", "a.txt").await;
    let package = custody
        .export(custody::ExportRequest::new(
            [d1],
            LedgerRange::new(1, 1).unwrap(),
            t(),
            examiner(),
        ))
        .await
        .unwrap();

    let target = dir.path().join("pkg");
    package.write_to(&target).unwrap();

    // Flip the object bytes.
    let object = target.join(custody::core::object_path(&d1));
    fs::write(&object, b"evidence-2").unwrap();
    let report = Package::read_from(&target).unwrap().verify().unwrap();
    assert!(report
        .faults
        .iter()
        .any(|f| matches!(f, PackageFault::ObjectDigestMismatch { .. })));
    assert!(report
        .faults
        .iter()
        .any(|f| matches!(f, PackageFault::PackageHashMismatch { .. })));

    // Restore it and edit the statement instead.
    fs::write(&object, b"evidence-1").unwrap();
    assert!(Package::read_from(&target).unwrap().verify().unwrap().is_valid());
    let statement = target.join("statement.txt");
    let text = fs::read_to_string(&statement).unwrap();
    fs::write(&statement, text.replacen("text/plain", "image/png", 1)).unwrap();
    let report = Package::read_from(&target).unwrap().verify().unwrap();
    assert!(report
        .faults
        .iter()
        .any(|f| matches!(f, PackageFault::StatementMismatch { .. })));
}

#[tokio::test]
async fn store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("vault");
    let (d1, d2, sealed) = {
        let custody = open(&root);
        let d1 = ingest(&custody, b"evidence-1", "a.txt").await;
        custody
            .evidence()
            .verify(&d1, &examiner())
            .await
            .unwrap();
        let d2 = ingest(&custody, b"evidence-2", "b.txt").await;

        let coordinator = custody.coordinator();
        let g1 = coordinator.create_group("g1", &clerk()).await.unwrap().group_id;
        coordinator
            .add_member(g1, d1, OffsetMetadata::new(0).with_label("cam-1"), &clerk())
            .await
            .unwrap();
        let sealed = coordinator.seal(g1, &clerk()).await.unwrap();
        let open_group = coordinator.create_group("g2", &clerk()).await.unwrap().group_id;
        coordinator
            .add_member(open_group, d2, OffsetMetadata::new(40), &clerk())
            .await
            .unwrap();
        (d1, d2, sealed)
    };

    let custody = open(&root);
    let bytes = custody.evidence().get(&d1, &examiner()).await.unwrap();
    assert_eq!(bytes.as_ref(), b"evidence-1");

    // The cursor picks up after the persisted head: two ingests and a
    // verification, two creates, one seal, then this read.
    let head = custody.ledger().head().await.unwrap().unwrap();
    assert_eq!(head.sequence_number, 7);
    assert_eq!(head.event_kind, EventKind::Accessed);
    assert!(custody.ledger().verify_chain(1, 7).await.unwrap().valid);

    // The sealed group is still sealed, with the same snapshot.
    let coordinator = custody.coordinator();
    let g1 = sealed.group_id();
    assert_eq!(coordinator.sealed_group(g1).await.unwrap(), sealed);
    let record = coordinator.group(g1).await.unwrap();
    assert!(record.is_sealed);
    assert!(record.is_consistent());

    // Mutation is denied and recorded.
    let err = coordinator
        .add_member(g1, d2, OffsetMetadata::new(0), &clerk())
        .await
        .unwrap_err();
    assert!(matches!(err, CustodyError::GroupSealed(id) if id == g1));
    let denied = custody.ledger().head().await.unwrap().unwrap();
    assert_eq!(denied.event_kind, EventKind::MutationDenied);
    assert_eq!(denied.subject_digest, g1.as_subject());

    // Re-sealing and re-creating change nothing.
    let count = custody.ledger().count().await.unwrap();
    assert_eq!(coordinator.seal(g1, &examiner()).await.unwrap(), sealed);
    assert!(matches!(
        coordinator.create_group("g1", &clerk()).await,
        Err(CustodyError::GroupExists(id)) if id == g1
    ));
    assert_eq!(custody.ledger().count().await.unwrap(), count);

    // The unsealed group kept its member and can still be sealed.
    let g2 = custody::core::GroupId::derive("g2");
    let open_record = coordinator.group(g2).await.unwrap();
    assert!(!open_record.is_sealed);
    assert_eq!(open_record.member_refs.len(), 1);
    assert_eq!(open_record.member_refs[0].digest, d2);
    coordinator.seal(g2, &clerk()).await.unwrap();

    // A sealed group from before the reopen can be exported.
    let range = LedgerRange::new(1, 3).unwrap();
    let package = custody
        .export(custody::ExportRequest::new([d1], range, t(), examiner()).with_groups([g1]))
        .await
        .unwrap();
    assert_eq!(package.groups().unwrap()[0], sealed.record());
}
