//! Export package model and third-party verification.
//!
//! A package is an ordered map of relative paths to bytes plus the manifest.
//! Paths sort lexicographically, so `groups.json`, `ledger.jsonl`,
//! `objects/<hex>` and `statement.txt` always hash in the same order.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::chain::{ChainReport, ChainVerifier};
use crate::digest::{Digest, DigestHasher, GroupId};
use crate::entry::LedgerEntry;
use crate::error::CoreError;
use crate::group::GroupRecord;
use crate::manifest::{ExportManifest, LedgerRange};
use crate::statement::verify_statement;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const LEDGER_FILE: &str = "ledger.jsonl";
pub const GROUPS_FILE: &str = "groups.json";
pub const STATEMENT_FILE: &str = "statement.txt";
pub const OBJECTS_DIR: &str = "objects";

/// Relative path of a content object inside a package.
pub fn object_path(digest: &Digest) -> String {
    format!("{OBJECTS_DIR}/{}", digest.to_hex())
}

/// Compute the package hash over every file and the masked manifest.
pub fn package_hash(
    files: &BTreeMap<String, Bytes>,
    manifest: &ExportManifest,
) -> Result<Digest, CoreError> {
    let mut hasher = DigestHasher::new();
    hasher.update(crate::domain::PACKAGE.as_bytes());
    hasher.update(b":");
    for (path, bytes) in files {
        hasher.update(&(path.len() as u64).to_be_bytes());
        hasher.update(path.as_bytes());
        hasher.update(&(bytes.len() as u64).to_be_bytes());
        hasher.update(Digest::hash(bytes).as_bytes());
    }
    let masked = manifest.masked_json()?;
    hasher.update(&(masked.len() as u64).to_be_bytes());
    hasher.update(&masked);
    Ok(hasher.finalize())
}

/// An assembled export package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    files: BTreeMap<String, Bytes>,
    manifest: ExportManifest,
}

impl Package {
    /// Seal the file set: compute `package_hash` and store it in the manifest.
    pub fn assemble(
        files: BTreeMap<String, Bytes>,
        mut manifest: ExportManifest,
    ) -> Result<Self, CoreError> {
        manifest.package_hash = Digest::GENESIS;
        manifest.package_hash = package_hash(&files, &manifest)?;
        Ok(Self { files, manifest })
    }

    /// Rebuild from parts read back from storage, without recomputing
    /// anything. Use [`Package::verify`] before trusting it.
    pub fn from_parts(files: BTreeMap<String, Bytes>, manifest: ExportManifest) -> Self {
        Self { files, manifest }
    }

    pub fn manifest(&self) -> &ExportManifest {
        &self.manifest
    }

    pub fn package_hash(&self) -> Digest {
        self.manifest.package_hash
    }

    pub fn manifest_id(&self) -> Digest {
        self.manifest.manifest_id
    }

    pub fn files(&self) -> &BTreeMap<String, Bytes> {
        &self.files
    }

    pub fn file(&self, path: &str) -> Option<&Bytes> {
        self.files.get(path)
    }

    pub fn object(&self, digest: &Digest) -> Option<&Bytes> {
        self.files.get(&object_path(digest))
    }

    /// Parse the bundled ledger slice.
    pub fn ledger_entries(&self) -> Result<Vec<LedgerEntry>, CoreError> {
        let bytes = self
            .file(LEDGER_FILE)
            .ok_or_else(|| CoreError::Decoding(format!("{LEDGER_FILE} missing")))?;
        let text = std::str::from_utf8(bytes).map_err(|e| CoreError::Decoding(e.to_string()))?;
        text.lines()
            .filter(|line| !line.is_empty())
            .map(LedgerEntry::from_json_line)
            .collect()
    }

    /// Parse the bundled group records.
    pub fn groups(&self) -> Result<Vec<GroupRecord>, CoreError> {
        match self.file(GROUPS_FILE) {
            Some(bytes) => {
                serde_json::from_slice(bytes).map_err(|e| CoreError::Decoding(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }

    /// The rendered statement, if bundled.
    pub fn statement(&self) -> Result<Option<&str>, CoreError> {
        self.file(STATEMENT_FILE)
            .map(|bytes| std::str::from_utf8(bytes).map_err(|e| CoreError::Decoding(e.to_string())))
            .transpose()
    }

    /// Recompute everything a third party can check from the package alone.
    ///
    /// Faults are collected rather than short-circuited so the report names
    /// every problem.
    pub fn verify(&self) -> Result<PackageReport, CoreError> {
        let mut faults = Vec::new();
        let manifest = &self.manifest;

        // Objects: exactly the listed digests, each matching its name.
        let mut expected_files: BTreeSet<String> = manifest
            .included_digests
            .iter()
            .map(object_path)
            .collect();
        for digest in &manifest.included_digests {
            match self.object(digest) {
                Some(bytes) => {
                    let actual = Digest::hash(bytes);
                    if actual != *digest {
                        faults.push(PackageFault::ObjectDigestMismatch {
                            path: object_path(digest),
                            actual,
                        });
                    }
                }
                None => faults.push(PackageFault::MissingFile(object_path(digest))),
            }
        }

        // Ledger slice: the full range, linked and hashed.
        expected_files.insert(LEDGER_FILE.to_string());
        match self.ledger_entries() {
            Ok(entries) => self.check_ledger(&entries, &mut faults)?,
            Err(e) => faults.push(PackageFault::LedgerUnreadable(e.to_string())),
        }

        // Groups: each listed, sealed and consistent.
        expected_files.insert(GROUPS_FILE.to_string());
        match self.groups() {
            Ok(groups) => {
                let listed: Vec<GroupId> = groups.iter().map(|g| g.group_id).collect();
                if listed != manifest.included_groups {
                    faults.push(PackageFault::GroupSetMismatch);
                }
                for group in &groups {
                    if !group.is_consistent() {
                        faults.push(PackageFault::GroupInconsistent(group.group_id));
                    }
                }
            }
            Err(e) => faults.push(PackageFault::GroupsUnreadable(e.to_string())),
        }

        // Statement: present iff the manifest names a hash, and self-consistent.
        if manifest.has_statement() {
            expected_files.insert(STATEMENT_FILE.to_string());
            let embedded = match self.statement() {
                Ok(Some(text)) => match verify_statement(text) {
                    Ok(check) if check.is_valid() => Some(check.embedded),
                    _ => None,
                },
                _ => None,
            };
            if embedded != Some(manifest.rendered_summary_hash) {
                faults.push(PackageFault::StatementMismatch {
                    expected: manifest.rendered_summary_hash,
                    embedded,
                });
            }
        }

        for path in self.files.keys() {
            if !expected_files.contains(path) {
                faults.push(PackageFault::UnexpectedFile(path.clone()));
            }
        }
        for path in &expected_files {
            if !self.files.contains_key(path) && !path.starts_with(OBJECTS_DIR) {
                faults.push(PackageFault::MissingFile(path.clone()));
            }
        }

        let expected_id = manifest.expected_id()?;
        if expected_id != manifest.manifest_id {
            faults.push(PackageFault::ManifestIdMismatch {
                expected: expected_id,
                actual: manifest.manifest_id,
            });
        }

        let recomputed = package_hash(&self.files, manifest)?;
        if recomputed != manifest.package_hash {
            faults.push(PackageFault::PackageHashMismatch {
                stored: manifest.package_hash,
                recomputed,
            });
        }

        Ok(PackageReport { faults })
    }

    fn check_ledger(
        &self,
        entries: &[LedgerEntry],
        faults: &mut Vec<PackageFault>,
    ) -> Result<(), CoreError> {
        let range = self.manifest.included_ledger_range;
        let found = match (entries.first(), entries.last()) {
            (Some(first), Some(last)) => Some((first.sequence_number, last.sequence_number)),
            _ => None,
        };
        if found != Some((range.from, range.to)) || entries.len() as u64 != range.len() {
            faults.push(PackageFault::LedgerRangeMismatch {
                expected: range,
                found,
            });
        }

        let mut verifier = if range.from == 1 {
            ChainVerifier::new()
        } else {
            ChainVerifier::unanchored(range.from)
        };
        for entry in entries {
            verifier.push(entry)?;
        }
        let report = verifier.finish();
        if !report.valid {
            faults.push(PackageFault::LedgerChain(report));
        }
        Ok(())
    }
}

/// One problem found while verifying a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageFault {
    MissingFile(String),
    UnexpectedFile(String),
    ObjectDigestMismatch { path: String, actual: Digest },
    LedgerUnreadable(String),
    LedgerRangeMismatch {
        expected: LedgerRange,
        found: Option<(u64, u64)>,
    },
    LedgerChain(ChainReport),
    GroupsUnreadable(String),
    GroupSetMismatch,
    GroupInconsistent(GroupId),
    StatementMismatch {
        expected: Digest,
        embedded: Option<Digest>,
    },
    ManifestIdMismatch { expected: Digest, actual: Digest },
    PackageHashMismatch { stored: Digest, recomputed: Digest },
}

/// Outcome of [`Package::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageReport {
    pub faults: Vec<PackageFault>,
}

impl PackageReport {
    pub fn is_valid(&self) -> bool {
        self.faults.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryDraft;
    use crate::event::EventKind;
    use crate::manifest::manifest_id;
    use crate::statement::{render_statement, StatementInput};
    use crate::time;
    use crate::types::Accessor;

    fn ts() -> time::Timestamp {
        time::parse("2026-01-14T12:00:00Z").unwrap()
    }

    fn ledger(n: u64) -> Vec<LedgerEntry> {
        let accessor = Accessor::new("alice", "intake").unwrap();
        let mut prior = Digest::GENESIS;
        (1..=n)
            .map(|seq| {
                let entry = EntryDraft::new(EventKind::Ingest, Digest::hash(b"evidence-1"), &accessor)
                    .finalize(seq, prior, ts())
                    .unwrap();
                prior = entry.this_entry_hash;
                entry
            })
            .collect()
    }

    fn build(with_statement: bool) -> Package {
        let content = Bytes::from_static(b"evidence-1");
        let digest = Digest::hash(&content);
        let range = LedgerRange::new(1, 3).unwrap();
        let entries = ledger(3);

        let mut files = BTreeMap::new();
        files.insert(object_path(&digest), content);
        let mut jsonl = String::new();
        for entry in &entries {
            jsonl.push_str(&entry.to_json_line().unwrap());
            jsonl.push('\n');
        }
        files.insert(LEDGER_FILE.to_string(), Bytes::from(jsonl));
        files.insert(GROUPS_FILE.to_string(), Bytes::from_static(b"[]"));

        let id = manifest_id(&[digest], range, &[], &ts()).unwrap();
        let mut summary = Digest::GENESIS;
        if with_statement {
            let rendered = render_statement(&StatementInput {
                manifest_id: id,
                generated_at: ts(),
                ledger_range: range,
                ledger_head: entries[2].this_entry_hash,
                objects: &[],
                groups: &[],
            });
            summary = rendered.hash;
            files.insert(STATEMENT_FILE.to_string(), Bytes::from(rendered.text));
        }

        let manifest = ExportManifest {
            manifest_id: id,
            generated_at: ts(),
            included_digests: vec![digest],
            included_ledger_range: range,
            included_groups: vec![],
            rendered_summary_hash: summary,
            package_hash: Digest::GENESIS,
        };
        Package::assemble(files, manifest).unwrap()
    }

    #[test]
    fn test_assembled_package_verifies() {
        for with_statement in [false, true] {
            let package = build(with_statement);
            let report = package.verify().unwrap();
            assert!(report.is_valid(), "{:?}", report.faults);
        }
    }

    #[test]
    fn test_package_hash_deterministic() {
        assert_eq!(build(true).package_hash(), build(true).package_hash());
    }

    #[test]
    fn test_tampered_object_detected() {
        let package = build(false);
        let mut files = package.files().clone();
        let path = object_path(&Digest::hash(b"evidence-1"));
        files.insert(path, Bytes::from_static(b"evidence-2"));
        let tampered = Package::from_parts(files, package.manifest().clone());

        let report = tampered.verify().unwrap();
        assert!(report
            .faults
            .iter()
            .any(|f| matches!(f, PackageFault::ObjectDigestMismatch { .. })));
        assert!(report
            .faults
            .iter()
            .any(|f| matches!(f, PackageFault::PackageHashMismatch { .. })));
    }

    #[test]
    fn test_extra_file_detected() {
        let package = build(false);
        let mut files = package.files().clone();
        files.insert("notes.txt".into(), Bytes::from_static(b"hi"));
        let report = Package::from_parts(files, package.manifest().clone())
            .verify()
            .unwrap();
        assert!(report
            .faults
            .contains(&PackageFault::UnexpectedFile("notes.txt".into())));
    }

    #[test]
    fn test_truncated_ledger_detected() {
        let package = build(false);
        let mut files = package.files().clone();
        let entries = ledger(2);
        let jsonl: String = entries
            .iter()
            .map(|e| format!("{}\n", e.to_json_line().unwrap()))
            .collect();
        files.insert(LEDGER_FILE.into(), Bytes::from(jsonl));
        let report = Package::from_parts(files, package.manifest().clone())
            .verify()
            .unwrap();
        assert!(report
            .faults
            .iter()
            .any(|f| matches!(f, PackageFault::LedgerRangeMismatch { .. })));
    }

    #[test]
    fn test_path_order_is_fixed() {
        let package = build(true);
        let paths: Vec<&str> = package.files().keys().map(String::as_str).collect();
        assert_eq!(paths[0], GROUPS_FILE);
        assert_eq!(paths[1], LEDGER_FILE);
        assert!(paths[2].starts_with("objects/"));
        assert_eq!(paths[3], STATEMENT_FILE);
    }
}
