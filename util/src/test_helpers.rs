use std::{fs, path::Path};
use tempfile::TempDir;

/// Creates a unique temporary directory whose absolute, canonical path can be
/// used as a storage root. The directory is removed when the `TempDir` drops.
///
/// Keep the returned `TempDir` in scope for as long as you need the files.
pub fn setup_test_root() -> TempDir {
    TempDir::new().expect("failed to create tempdir")
}

/// Write `contents` to `root/relative`, creating parent directories.
pub fn write_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create parent dir");
    }
    fs::write(&path, contents).expect("failed to write test file");
}

/// Sorted list of every file under `root`, relative to `root`, using `/` separators.
pub fn list_files(root: &Path) -> Vec<String> {
    fn walk(base: &Path, dir: &Path, out: &mut Vec<String>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.is_dir() {
                walk(base, &path, out);
            } else if let Ok(rel) = path.strip_prefix(base) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }

    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}
