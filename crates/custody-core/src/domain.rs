//! Domain separation prefixes.
//!
//! These strings are hashed into every derived digest. They are frozen:
//! changing one invalidates every existing ledger and package.

pub const ENTRY: &str = "custody/entry/v1";
pub const GROUP: &str = "custody/group/v1";
pub const GROUP_SNAPSHOT: &str = "custody/group-snapshot/v1";
pub const MANIFEST: &str = "custody/manifest/v1";
pub const PACKAGE: &str = "custody/package/v1";
pub const STATEMENT: &str = "custody/statement/v1";
