//! Two-pass self-hashing statement rendering.
//!
//! The statement is rendered once with a placeholder of 64 zeros on its final
//! line, hashed, and rendered again with the hash in place of the
//! placeholder. Anyone holding only the text can swap the placeholder back
//! and recompute the hash.

use crate::digest::Digest;
use crate::error::CoreError;
use crate::group::GroupRecord;
use crate::manifest::LedgerRange;
use crate::time::{self, Timestamp};

/// The final-line placeholder used during the first pass.
pub const PLACEHOLDER: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One bundled object as described in the statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementObject {
    pub digest: Digest,
    pub byte_length: u64,
    pub media_type: String,
    pub role: String,
}

/// Everything the statement describes.
#[derive(Debug, Clone)]
pub struct StatementInput<'a> {
    pub manifest_id: Digest,
    pub generated_at: Timestamp,
    pub ledger_range: LedgerRange,
    /// `this_entry_hash` of the last entry in the slice.
    pub ledger_head: Digest,
    pub objects: &'a [StatementObject],
    pub groups: &'a [GroupRecord],
}

/// A rendered statement and its embedded hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedStatement {
    pub text: String,
    pub hash: Digest,
}

/// Render the statement and embed its own hash on the last line.
pub fn render_statement(input: &StatementInput<'_>) -> RenderedStatement {
    let body = render_body(input);
    let first_pass = format!("{body}{PLACEHOLDER}\n");
    let hash = statement_hash(&first_pass);
    RenderedStatement {
        text: format!("{body}{}\n", hash.to_hex()),
        hash,
    }
}

fn render_body(input: &StatementInput<'_>) -> String {
    let mut out = String::new();
    out.push_str("EVIDENCE EXPORT STATEMENT\n");
    out.push('\n');
    out.push_str(&format!("Manifest: {}\n", input.manifest_id));
    out.push_str(&format!("Generated at: {}\n", time::format(&input.generated_at)));
    out.push_str(&format!(
        "Ledger entries: {} through {} ({} entries), last entry hash {}\n",
        input.ledger_range.from,
        input.ledger_range.to,
        input.ledger_range.len(),
        input.ledger_head,
    ));
    out.push('\n');

    out.push_str(&format!("Content objects ({}):\n", input.objects.len()));
    for object in input.objects {
        out.push_str(&format!(
            "  {}  {} bytes  {}  {}\n",
            object.digest, object.byte_length, object.media_type, object.role
        ));
    }
    out.push('\n');

    out.push_str(&format!("Sealed groups ({}):\n", input.groups.len()));
    for group in input.groups {
        out.push_str(&format!(
            "  {}  {}  {} members",
            group.group_id.as_subject(),
            group.label,
            group.member_refs.len()
        ));
        if let (Some(by), Some(at)) = (&group.sealed_by, &group.sealed_at) {
            out.push_str(&format!("  sealed by {} at {}", by, time::format(at)));
        }
        if let Some(snapshot) = &group.snapshot_digest {
            out.push_str(&format!("  snapshot {snapshot}"));
        }
        out.push('\n');
    }
    out.push('\n');

    out.push_str("Every file in this package is listed in manifest.json with its BLAKE3 digest.\n");
    out.push_str("Statement hash (BLAKE3, computed with the line below set to 64 zeros):\n");
    out
}

fn statement_hash(first_pass: &str) -> Digest {
    Digest::derive(crate::domain::STATEMENT, first_pass.as_bytes())
}

/// Result of re-deriving a statement's embedded hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementCheck {
    pub embedded: Digest,
    pub recomputed: Digest,
}

impl StatementCheck {
    pub fn is_valid(&self) -> bool {
        self.embedded == self.recomputed
    }
}

/// Recompute a statement's hash from its text alone.
///
/// Fails if the last line is not a 64-character hex digest.
pub fn verify_statement(text: &str) -> Result<StatementCheck, CoreError> {
    let trimmed = text
        .strip_suffix('\n')
        .ok_or_else(|| CoreError::MalformedStatement("missing trailing newline".into()))?;
    let (body, last_line) = match trimmed.rsplit_once('\n') {
        Some((body, last)) => (&text[..body.len() + 1], last),
        None => ("", trimmed),
    };
    let embedded = Digest::from_hex(last_line)
        .map_err(|e| CoreError::MalformedStatement(format!("last line is not a digest: {e}")))?;

    let first_pass = format!("{body}{PLACEHOLDER}\n");
    Ok(StatementCheck {
        embedded,
        recomputed: statement_hash(&first_pass),
    })
}
