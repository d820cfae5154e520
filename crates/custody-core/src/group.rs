//! Sealable groups: metadata that references content objects by digest.
//!
//! A group is either [`UnsealedGroup`] (members may change freely) or
//! [`SealedGroup`] (frozen). The only way from one to the other is
//! [`UnsealedGroup::seal`], which consumes the unsealed value. `SealedGroup`
//! has no mutators, so editing a sealed group cannot be expressed.

use serde::{Deserialize, Serialize};

use crate::digest::{Digest, DigestHasher, GroupId};
use crate::error::GroupError;
use crate::time::{self, Timestamp};

/// Placement of a member within its group, e.g. the start offset of one
/// source in a set of time-synchronized recordings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OffsetMetadata {
    pub offset_ms: i64,

    /// Optional caller label, such as "camera-2".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl OffsetMetadata {
    pub fn new(offset_ms: i64) -> Self {
        Self {
            offset_ms,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Whether two placements disagree by more than `tolerance_ms` or carry
    /// different labels.
    pub fn differs_materially(&self, other: &OffsetMetadata, tolerance_ms: i64) -> bool {
        let delta = self.offset_ms.abs_diff(other.offset_ms);
        delta > tolerance_ms.max(0) as u64 || self.label != other.label
    }
}

/// A member of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRef {
    pub digest: Digest,
    pub offset: OffsetMetadata,
}

/// A group whose members may still change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsealedGroup {
    group_id: GroupId,
    label: String,
    members: Vec<MemberRef>,
    created_at: Timestamp,
}

impl UnsealedGroup {
    /// Create an empty group. The id is derived from the label.
    pub fn new(label: impl Into<String>, created_at: Timestamp) -> Self {
        let label = label.into();
        Self {
            group_id: GroupId::derive(&label),
            label,
            members: Vec::new(),
            created_at: time::normalize(created_at),
        }
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn members(&self) -> &[MemberRef] {
        &self.members
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.members.iter().any(|m| &m.digest == digest)
    }

    /// Append a member. Each digest may appear once.
    pub fn add_member(&mut self, digest: Digest, offset: OffsetMetadata) -> Result<(), GroupError> {
        if self.contains(&digest) {
            return Err(GroupError::DuplicateMember {
                group: self.group_id,
                member: digest,
            });
        }
        self.members.push(MemberRef { digest, offset });
        Ok(())
    }

    /// Remove a member, preserving the order of the rest.
    pub fn remove_member(&mut self, digest: &Digest) -> Result<MemberRef, GroupError> {
        let index = self.position(digest)?;
        Ok(self.members.remove(index))
    }

    /// Replace a member's offset, returning the previous one.
    pub fn update_offset(
        &mut self,
        digest: &Digest,
        offset: OffsetMetadata,
    ) -> Result<OffsetMetadata, GroupError> {
        let index = self.position(digest)?;
        Ok(std::mem::replace(&mut self.members[index].offset, offset))
    }

    fn position(&self, digest: &Digest) -> Result<usize, GroupError> {
        self.members
            .iter()
            .position(|m| &m.digest == digest)
            .ok_or(GroupError::MemberNotFound {
                group: self.group_id,
                member: *digest,
            })
    }

    /// Freeze the group. This is the only transition between the states.
    pub fn seal(self, sealed_by: impl Into<String>, sealed_at: Timestamp) -> SealedGroup {
        let snapshot = snapshot_digest(self.group_id, &self.label, &self.members);
        SealedGroup {
            group_id: self.group_id,
            label: self.label,
            members: self.members,
            created_at: self.created_at,
            sealed_by: sealed_by.into(),
            sealed_at: time::normalize(sealed_at),
            snapshot,
        }
    }
}

/// A frozen group. No field can change after sealing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedGroup {
    group_id: GroupId,
    label: String,
    members: Vec<MemberRef>,
    created_at: Timestamp,
    sealed_by: String,
    sealed_at: Timestamp,
    snapshot: Digest,
}

impl SealedGroup {
    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn members(&self) -> &[MemberRef] {
        &self.members
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn sealed_by(&self) -> &str {
        &self.sealed_by
    }

    pub fn sealed_at(&self) -> Timestamp {
        self.sealed_at
    }

    /// Digest of the frozen id, label and members, in member order.
    pub fn snapshot_digest(&self) -> Digest {
        self.snapshot
    }

    pub fn member(&self, digest: &Digest) -> Option<&MemberRef> {
        self.members.iter().find(|m| &m.digest == digest)
    }

    pub fn record(&self) -> GroupRecord {
        GroupRecord {
            group_id: self.group_id,
            label: self.label.clone(),
            member_refs: self.members.clone(),
            is_sealed: true,
            created_at: self.created_at,
            sealed_by: Some(self.sealed_by.clone()),
            sealed_at: Some(self.sealed_at),
            snapshot_digest: Some(self.snapshot),
        }
    }
}

fn snapshot_digest(group_id: GroupId, label: &str, members: &[MemberRef]) -> Digest {
    // Length-prefixed framing so that field boundaries are unambiguous.
    fn put_str(hasher: &mut DigestHasher, s: &str) {
        hasher.update(&(s.len() as u64).to_be_bytes());
        hasher.update(s.as_bytes());
    }

    let mut hasher = DigestHasher::new();
    hasher.update(crate::domain::GROUP_SNAPSHOT.as_bytes());
    hasher.update(b":");
    hasher.update(group_id.as_subject().as_bytes());
    put_str(&mut hasher, label);
    hasher.update(&(members.len() as u64).to_be_bytes());
    for member in members {
        hasher.update(member.digest.as_bytes());
        hasher.update(&member.offset.offset_ms.to_be_bytes());
        match &member.offset.label {
            Some(label) => {
                hasher.update(&[1]);
                put_str(&mut hasher, label);
            }
            None => {
                hasher.update(&[0]);
            }
        }
    }
    hasher.finalize()
}

/// A group in either state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupState {
    Unsealed(UnsealedGroup),
    Sealed(SealedGroup),
}

impl GroupState {
    pub fn group_id(&self) -> GroupId {
        match self {
            GroupState::Unsealed(g) => g.group_id(),
            GroupState::Sealed(g) => g.group_id(),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            GroupState::Unsealed(g) => g.label(),
            GroupState::Sealed(g) => g.label(),
        }
    }

    pub fn members(&self) -> &[MemberRef] {
        match self {
            GroupState::Unsealed(g) => g.members(),
            GroupState::Sealed(g) => g.members(),
        }
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self, GroupState::Sealed(_))
    }

    pub fn as_sealed(&self) -> Option<&SealedGroup> {
        match self {
            GroupState::Sealed(g) => Some(g),
            GroupState::Unsealed(_) => None,
        }
    }

    /// Mutable access for membership edits; fails once sealed.
    pub fn unsealed_mut(&mut self) -> Result<&mut UnsealedGroup, GroupError> {
        match self {
            GroupState::Unsealed(g) => Ok(g),
            GroupState::Sealed(g) => Err(GroupError::Sealed(g.group_id())),
        }
    }

    /// Seal in place. Returns `true` if this call performed the transition and
    /// `false` if the group was already sealed.
    pub fn seal(&mut self, sealed_by: &str, sealed_at: Timestamp) -> bool {
        match self {
            GroupState::Sealed(_) => false,
            GroupState::Unsealed(group) => {
                let sealed = group.clone().seal(sealed_by, sealed_at);
                *self = GroupState::Sealed(sealed);
                true
            }
        }
    }

    /// Rebuild a group from its stored record.
    ///
    /// A sealed record must carry its sealer, seal time and a snapshot that
    /// matches the listed members. The snapshot is taken from the record, so
    /// a restored group compares equal to the one that was saved.
    pub fn restore(record: GroupRecord) -> Result<Self, GroupError> {
        let group_id = record.group_id;
        if group_id != GroupId::derive(&record.label) {
            return Err(GroupError::Inconsistent(group_id));
        }
        let mut group = UnsealedGroup::new(record.label.clone(), record.created_at);
        for member in &record.member_refs {
            group
                .add_member(member.digest, member.offset.clone())
                .map_err(|_| GroupError::Inconsistent(group_id))?;
        }
        if !record.is_sealed {
            return Ok(GroupState::Unsealed(group));
        }

        let (Some(sealed_by), Some(sealed_at)) = (record.sealed_by.clone(), record.sealed_at)
        else {
            return Err(GroupError::Inconsistent(group_id));
        };
        if !record.is_consistent() {
            return Err(GroupError::Inconsistent(group_id));
        }
        Ok(GroupState::Sealed(group.seal(sealed_by, sealed_at)))
    }

    /// Serializable view.
    pub fn record(&self) -> GroupRecord {
        match self {
            GroupState::Unsealed(g) => GroupRecord {
                group_id: g.group_id(),
                label: g.label().to_string(),
                member_refs: g.members().to_vec(),
                is_sealed: false,
                created_at: g.created_at(),
                sealed_by: None,
                sealed_at: None,
                snapshot_digest: None,
            },
            GroupState::Sealed(g) => g.record(),
        }
    }
}

/// Serializable view of a group, as returned to callers and written into
/// export packages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub group_id: GroupId,
    pub label: String,
    pub member_refs: Vec<MemberRef>,
    pub is_sealed: bool,
    #[serde(with = "time::rfc3339")]
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "time::rfc3339_opt")]
    pub sealed_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_digest: Option<Digest>,
}

impl GroupRecord {
    /// Recompute the snapshot digest from the listed members.
    pub fn recompute_snapshot(&self) -> Digest {
        snapshot_digest(self.group_id, &self.label, &self.member_refs)
    }

    /// Whether a sealed record is internally consistent: the id derives from
    /// the label and the snapshot matches the members.
    pub fn is_consistent(&self) -> bool {
        self.group_id == GroupId::derive(&self.label)
            && self.is_sealed
            && self.snapshot_digest == Some(self.recompute_snapshot())
    }
}

/// An overlapping member whose placement disagrees with a sealed group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetConflict {
    pub digest: Digest,
    pub this_offset: OffsetMetadata,
    pub other_group: GroupId,
    pub other_offset: OffsetMetadata,
}

/// Compare `members` of group `group_id` against other sealed groups.
///
/// A conflict is a digest present in both whose offsets differ by more than
/// `tolerance_ms` or whose labels differ. The group itself is skipped.
pub fn find_conflicts<'a>(
    group_id: GroupId,
    members: &[MemberRef],
    others: impl IntoIterator<Item = &'a SealedGroup>,
    tolerance_ms: i64,
) -> Vec<OffsetConflict> {
    let mut conflicts = Vec::new();
    for other in others {
        if other.group_id() == group_id {
            continue;
        }
        for member in members {
            if let Some(theirs) = other.member(&member.digest) {
                if member.offset.differs_materially(&theirs.offset, tolerance_ms) {
                    conflicts.push(OffsetConflict {
                        digest: member.digest,
                        this_offset: member.offset.clone(),
                        other_group: other.group_id(),
                        other_offset: theirs.offset.clone(),
                    });
                }
            }
        }
    }
    conflicts.sort_by(|a, b| (a.digest, a.other_group).cmp(&(b.digest, b.other_group)));
    conflicts
}
