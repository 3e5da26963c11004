//! File-based storage backend for persistent storage.

use crate::backend::{validate_name, StorageBackend};
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the advisory lock file inside the root directory.
const LOCK_FILE: &str = "LOCK";

/// A directory-based storage backend.
///
/// Each blob is one file below the root directory; a blob named
/// `tables/users.snap` lives at `<root>/tables/users.snap`.
///
/// # Durability
///
/// `write()` stages the data in a sibling `.tmp` file, calls
/// `File::sync_all()`, then renames it over the target, so a crash leaves
/// either the old or the new contents.
///
/// # Locking
///
/// The backend holds an exclusive advisory lock on `<root>/LOCK` for its
/// lifetime. A second `open` of the same directory fails with
/// [`StorageError::Locked`].
///
/// # Example
///
/// ```no_run
/// use shelfdb_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("my_db")).unwrap();
/// backend.write("tables/users.snap", b"persistent data").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    _lock_file: File,
}

impl FileBackend {
    /// Opens or creates a backend rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, or if another
    /// process holds the lock.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StorageError::Locked(root.display().to_string()))?;

        debug!(root = %root.display(), "opened file backend");

        Ok(Self {
            root: root.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> StorageResult<PathBuf> {
        validate_name(name)?;
        Ok(name.split('/').fold(self.root.clone(), |p, c| p.join(c)))
    }

    fn collect(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) -> StorageResult<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let relative = if prefix.is_empty() {
                file_name.clone()
            } else {
                format!("{prefix}/{file_name}")
            };

            if entry.file_type()?.is_dir() {
                self.collect(&entry.path(), &relative, out)?;
            } else if relative != LOCK_FILE && !file_name.ends_with(".tmp") {
                out.push(relative);
            }
        }
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.path_of(name)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.path_of(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut staging = path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        {
            let mut file = File::create(&staging)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&staging, &path)?;
        Ok(())
    }

    fn remove(&self, name: &str) -> StorageResult<bool> {
        let path = self.path_of(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        self.collect(&self.root, "", &mut names)?;
        names.retain(|n| n.starts_with(prefix));
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_write_and_read() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.write("tables/a.snap", b"hello").unwrap();
        assert_eq!(
            backend.read("tables/a.snap").unwrap(),
            Some(b"hello".to_vec())
        );
        assert!(dir.path().join("tables").join("a.snap").exists());
    }

    #[test]
    fn file_missing_blob_is_none() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(backend.read("nothing").unwrap(), None);
    }

    #[test]
    fn file_persistence_across_reopen() {
        let dir = tempdir().unwrap();

        {
            let backend = FileBackend::open(dir.path()).unwrap();
            backend.write("journal/1", b"entry").unwrap();
        }

        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(backend.read("journal/1").unwrap(), Some(b"entry".to_vec()));
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _first = FileBackend::open(dir.path()).unwrap();

        let second = FileBackend::open(dir.path());
        assert!(matches!(second, Err(StorageError::Locked(_))));
    }

    #[test]
    fn file_list_skips_lock_and_staging() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.write("tables/b.snap", b"").unwrap();
        backend.write("tables/a.snap", b"").unwrap();
        backend.write("journal/7", b"").unwrap();
        fs::write(dir.path().join("tables").join("c.snap.tmp"), b"partial").unwrap();

        assert_eq!(
            backend.list("").unwrap(),
            vec![
                "journal/7".to_string(),
                "tables/a.snap".to_string(),
                "tables/b.snap".to_string(),
            ]
        );
        assert_eq!(backend.list("tables/").unwrap().len(), 2);
    }

    #[test]
    fn file_remove() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.write("journal/1", b"x").unwrap();
        assert!(backend.remove("journal/1").unwrap());
        assert!(!backend.remove("journal/1").unwrap());
        assert_eq!(backend.read("journal/1").unwrap(), None);
    }
}
