//! Writing and reading export packages as directories.
//!
//! A package is written into a sibling temp directory and renamed into
//! place, so the target either appears complete or not at all. File mtimes
//! are container metadata and are outside the package hash.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use custody_core::package::MANIFEST_FILE;
use custody_core::{ExportManifest, Package};
use custody_store::StoreError;

use crate::error::{CustodyError, Result};

/// Directory I/O for [`Package`].
pub trait PackageDir: Sized {
    /// Write the package to `dir`, which must not exist yet.
    fn write_to(&self, dir: &Path) -> Result<()>;

    /// Read a package back. Nothing is trusted until `verify()` is run.
    ///
    /// Symbolic links and other non-regular files inside `dir` are refused,
    /// so a package cannot pull in bytes from outside its directory.
    fn read_from(dir: &Path) -> Result<Self>;
}

impl PackageDir for Package {
    fn write_to(&self, dir: &Path) -> Result<()> {
        if dir.exists() {
            return Err(CustodyError::InvalidRequest(format!(
                "export target {} already exists",
                dir.display()
            )));
        }
        let parent = match dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(StoreError::from)?;

        let staging = tempfile::Builder::new()
            .prefix(".custody-export-")
            .tempdir_in(&parent)
            .map_err(StoreError::from)?;

        for (path, bytes) in self.files() {
            write_file(staging.path(), path, bytes)?;
        }
        let manifest = self.manifest().to_json()?;
        write_file(staging.path(), MANIFEST_FILE, &manifest)?;

        // The emptied temp dir handle is dropped afterwards and finds nothing to remove.
        fs::rename(staging.path(), dir).map_err(StoreError::from)?;
        Ok(())
    }

    fn read_from(dir: &Path) -> Result<Self> {
        let mut files = BTreeMap::new();
        collect_files(dir, dir, &mut files)?;
        let manifest_bytes = files.remove(MANIFEST_FILE).ok_or_else(|| {
            CustodyError::InvalidRequest(format!(
                "{} has no {MANIFEST_FILE}",
                dir.display()
            ))
        })?;
        let manifest = ExportManifest::from_json(&manifest_bytes)?;
        Ok(Package::from_parts(files, manifest))
    }
}

fn write_file(root: &Path, relative: &str, bytes: &[u8]) -> Result<()> {
    let target = root.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(StoreError::from)?;
    }
    fs::write(&target, bytes).map_err(StoreError::from)?;
    Ok(())
}

/// Collect every regular file under `dir`, keyed by its `/`-separated path
/// relative to `root`. Links are not followed.
fn collect_files(root: &Path, dir: &Path, files: &mut BTreeMap<String, Bytes>) -> Result<()> {
    for entry in fs::read_dir(dir).map_err(StoreError::from)? {
        let entry = entry.map_err(StoreError::from)?;
        let path = entry.path();
        // `DirEntry::file_type` describes the entry itself, not its target.
        let file_type = entry.file_type().map_err(StoreError::from)?;
        if file_type.is_symlink() {
            return Err(CustodyError::InvalidRequest(format!(
                "package entry {} is a symbolic link",
                path.display()
            )));
        }
        if file_type.is_dir() {
            collect_files(root, &path, files)?;
        } else if !file_type.is_file() {
            return Err(CustodyError::InvalidRequest(format!(
                "package entry {} is not a regular file",
                path.display()
            )));
        } else {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| CustodyError::InvalidRequest(e.to_string()))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let bytes = fs::read(&path).map_err(StoreError::from)?;
            files.insert(relative, Bytes::from(bytes));
        }
    }
    Ok(())
}
