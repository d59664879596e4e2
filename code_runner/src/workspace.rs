//! Filesystem operations used while staging and running tests.
//!
//! Staging code talks to a [`Workspace`] instead of `std::fs` so the copy rules can be
//! exercised against [`MemoryWorkspace`] without touching disk. Production code uses
//! [`LocalWorkspace`].

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One directory entry as reported by [`Workspace::list_dir`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
}

pub trait Workspace: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    /// Removes `path` recursively if present. Missing paths are not an error.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Removes `path` and recreates it as an empty directory.
    fn clear(&self, path: &Path) -> io::Result<()> {
        self.remove(path)?;
        self.create_dir_all(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Creates `path` (and missing parents), failing with
    /// [`io::ErrorKind::AlreadyExists`] if `path` itself already exists.
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Entries directly under `dir`, sorted by name.
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<Entry>>;

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Copies the contents of `from` into `to`, creating `to` if needed.
    fn copy_tree(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.create_dir_all(to)?;
        for entry in self.list_dir(from)? {
            let src = from.join(&entry.name);
            let dst = to.join(&entry.name);
            if entry.is_dir {
                self.copy_tree(&src, &dst)?;
            } else {
                self.copy_file(&src, &dst)?;
            }
        }
        Ok(())
    }
}

/// [`Workspace`] backed by the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalWorkspace;

impl Workspace for LocalWorkspace {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
            Ok(_) => fs::remove_file(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir(path)
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<Entry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            entries.push(Entry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        entries.sort();
        Ok(entries)
    }

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        // fs::copy keeps permission bits, so an executable harness stays executable.
        fs::copy(from, to).map(|_| ())
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }
}

#[derive(Debug, Default)]
struct Tree {
    dirs: BTreeSet<PathBuf>,
    files: BTreeMap<PathBuf, Vec<u8>>,
}

impl Tree {
    fn add_dirs(&mut self, path: &Path) {
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            self.dirs.insert(ancestor.to_path_buf());
        }
    }
}

/// In-memory [`Workspace`] for tests.
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    tree: Mutex<Tree>,
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tree> {
        // A poisoned lock only means another test thread panicked.
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every file under `root`, relative to it, sorted.
    pub fn files_under(&self, root: &Path) -> Vec<String> {
        self.lock()
            .files
            .keys()
            .filter_map(|p| p.strip_prefix(root).ok())
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .collect()
    }
}

impl Workspace for MemoryWorkspace {
    fn exists(&self, path: &Path) -> bool {
        let tree = self.lock();
        tree.dirs.contains(path) || tree.files.contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.lock().dirs.contains(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let mut tree = self.lock();
        tree.dirs.retain(|d| !d.starts_with(path));
        tree.files.retain(|f, _| !f.starts_with(path));
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.lock().add_dirs(path);
        Ok(())
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        let mut tree = self.lock();
        if tree.dirs.contains(path) || tree.files.contains_key(path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            ));
        }
        tree.add_dirs(path);
        Ok(())
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<Entry>> {
        let tree = self.lock();
        if !tree.dirs.contains(dir) {
            return Err(not_found(dir));
        }

        let child_name = |p: &PathBuf| -> Option<String> {
            (p.parent() == Some(dir))
                .then(|| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .flatten()
        };

        let mut entries: Vec<Entry> = tree
            .dirs
            .iter()
            .filter_map(|d| child_name(d).map(|name| Entry { name, is_dir: true }))
            .chain(
                tree.files
                    .keys()
                    .filter_map(|f| child_name(f).map(|name| Entry { name, is_dir: false })),
            )
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut tree = self.lock();
        let contents = tree.files.get(from).cloned().ok_or_else(|| not_found(from))?;
        if let Some(parent) = to.parent() {
            tree.add_dirs(parent);
        }
        tree.files.insert(to.to_path_buf(), contents);
        Ok(())
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut tree = self.lock();
        if let Some(parent) = path.parent() {
            tree.add_dirs(parent);
        }
        tree.files.insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.lock().files.get(path).cloned().ok_or_else(|| not_found(path))
    }
}
