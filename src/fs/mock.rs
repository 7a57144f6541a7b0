// src/fs/mock.rs

use super::FileSystem;
use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File(Vec<u8>),
    Dir(Vec<String>), // List of child names
}

/// In-memory filesystem. Clones share the same tree, so a test can hand one
/// clone to a store and inspect the "disk" through another.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, MockEntry>>>,
    fail_writes: Arc<Mutex<bool>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        let mut files = HashMap::new();
        // Ensure root exists
        files.insert(PathBuf::from("."), MockEntry::Dir(Vec::new()));

        Self {
            files: Arc::new(Mutex::new(files)),
            fail_writes: Arc::new(Mutex::new(false)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<PathBuf, MockEntry>>> {
        self.files
            .lock()
            .map_err(|_| anyhow!("mock filesystem lock poisoned"))
    }

    /// Make every subsequent write fail (simulates a full or read-only disk).
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut guard) = self.fail_writes.lock() {
            *guard = fail;
        }
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref().to_path_buf();
        let Ok(mut files) = self.lock() else {
            return;
        };
        files.insert(path.clone(), MockEntry::File(content.into()));

        // Ensure parent directories exist implicitly for simplicity in this mock
        if let Some(parent) = path.parent() {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };

            ensure_dir_entry(&mut files, parent);
            link_child(&mut files, parent, &path);
        }
    }

    /// Number of files below `dir` (direct children only).
    pub fn file_count(&self, dir: impl AsRef<Path>) -> usize {
        let Ok(files) = self.lock() else {
            return 0;
        };
        match files.get(dir.as_ref()) {
            Some(MockEntry::Dir(children)) => children
                .iter()
                .filter(|name| matches!(files.get(&dir.as_ref().join(name)), Some(MockEntry::File(_))))
                .count(),
            _ => 0,
        }
    }
}

fn link_child(files: &mut HashMap<PathBuf, MockEntry>, parent: &Path, child: &Path) {
    if let Some(MockEntry::Dir(children)) = files.get_mut(parent) {
        if let Some(name) = child.file_name().and_then(|n| n.to_str()) {
            if !children.contains(&name.to_string()) {
                children.push(name.to_string());
            }
        }
    }
}

fn ensure_dir_entry(files: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
    if files.contains_key(path) {
        return;
    }
    files.insert(path.to_path_buf(), MockEntry::Dir(Vec::new()));
    if let Some(parent) = path.parent() {
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };

        if parent != path {
            // Avoid infinite loop at root
            ensure_dir_entry(files, parent);
            link_child(files, parent, path);
        }
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let files = self.lock()?;
        match files.get(path) {
            Some(MockEntry::File(content)) => {
                String::from_utf8(content.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let failing = self.fail_writes.lock().map(|g| *g).unwrap_or(true);
        if failing {
            return Err(anyhow!("write rejected: {:?}", path));
        }
        self.add_file(path, contents);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock().map(|f| f.contains_key(path)).unwrap_or(false)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.lock()
            .map(|f| matches!(f.get(path), Some(MockEntry::Dir(_))))
            .unwrap_or(false)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut files = self.lock()?;
        ensure_dir_entry(&mut files, path);
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let files = self.lock()?;
        match files.get(path) {
            Some(MockEntry::Dir(children)) => {
                Ok(children.iter().map(|name| path.join(name)).collect())
            }
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }
}
