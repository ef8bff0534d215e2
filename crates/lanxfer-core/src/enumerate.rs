//! Source enumeration: turns a file or directory into an ordered manifest.
//!
//! Directories are walked depth-first with siblings sorted by file name, so
//! the same tree always yields the same entry order. Symbolic links are never
//! followed below the root; they are skipped, which rules out cycles.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::EnumerationError;
use crate::hash::HashAlgorithm;
use crate::protocol::{EntryDescriptor, TransferDescriptor, TransferKind};

/// A file to send: where it lives locally and where it goes remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub relative_path: String,
    pub size: u64,
    pub absolute_path: PathBuf,
}

/// Complete, ordered list of entries for one transfer.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub kind: TransferKind,
    pub name: String,
    pub entries: Vec<SourceEntry>,
    pub total_size: u64,
}

impl Manifest {
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn descriptor(&self, algorithm: HashAlgorithm) -> TransferDescriptor {
        let entries = self
            .entries
            .iter()
            .map(|e| EntryDescriptor {
                path: e.relative_path.clone(),
                size: e.size,
            })
            .collect();
        TransferDescriptor::new(self.kind, self.name.clone(), entries, algorithm)
    }
}

/// Lazy depth-first walk over the regular files below a directory.
pub struct DirectoryWalker {
    root: PathBuf,
    inner: walkdir::IntoIter,
}

impl DirectoryWalker {
    pub fn new(root: &Path) -> Self {
        let inner = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        Self {
            root: root.to_path_buf(),
            inner,
        }
    }
}

impl Iterator for DirectoryWalker {
    type Item = Result<SourceEntry, EnumerationError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().unwrap_or(self.root.as_path()).to_path_buf();
                    return Some(Err(EnumerationError::Unreadable {
                        path,
                        source: io::Error::from(err),
                    }));
                }
            };

            let file_type = entry.file_type();
            if file_type.is_symlink() {
                debug!(path = %entry.path().display(), "skipping symbolic link");
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(err) => {
                    return Some(Err(EnumerationError::Unreadable {
                        path: entry.path().to_path_buf(),
                        source: io::Error::from(err),
                    }));
                }
            };

            let relative = match entry.path().strip_prefix(&self.root) {
                Ok(relative) => relative,
                Err(_) => return Some(Err(EnumerationError::Unsupported(entry.path().to_path_buf()))),
            };

            return Some(wire_path(relative).map(|relative_path| SourceEntry {
                relative_path,
                size,
                absolute_path: entry.path().to_path_buf(),
            }));
        }
    }
}

/// Build the manifest for a file or a directory. Any error discards every
/// entry collected so far: a transfer never starts from a partial manifest.
pub fn enumerate_source(path: &Path) -> Result<Manifest, EnumerationError> {
    let metadata = fs::metadata(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => EnumerationError::NotFound(path.to_path_buf()),
        _ => EnumerationError::Unreadable {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    let name = source_name(path)?;

    if metadata.is_file() {
        let size = metadata.len();
        return Ok(Manifest {
            kind: TransferKind::SingleFile,
            entries: vec![SourceEntry {
                relative_path: name.clone(),
                size,
                absolute_path: path.to_path_buf(),
            }],
            name,
            total_size: size,
        });
    }

    if !metadata.is_dir() {
        return Err(EnumerationError::Unsupported(path.to_path_buf()));
    }

    let entries = DirectoryWalker::new(path).collect::<Result<Vec<_>, _>>()?;
    let total_size = entries.iter().map(|e| e.size).sum();
    debug!(
        root = %path.display(),
        entries = entries.len(),
        total_size,
        "enumerated directory"
    );

    Ok(Manifest {
        kind: TransferKind::Directory,
        name,
        entries,
        total_size,
    })
}

/// Final component of the source path as given. Only `.` and `..` style
/// paths, which have no name of their own, are resolved first.
fn source_name(path: &Path) -> Result<String, EnumerationError> {
    let resolved;
    let named = match path.file_name() {
        Some(_) => path,
        None => {
            resolved = fs::canonicalize(path).map_err(|e| EnumerationError::Unreadable {
                path: path.to_path_buf(),
                source: e,
            })?;
            resolved.as_path()
        }
    };
    named
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| EnumerationError::Unsupported(path.to_path_buf()))
}

/// Relative filesystem path → `/`-separated wire path.
fn wire_path(relative: &Path) -> Result<String, EnumerationError> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(part) => parts.push(part),
                None => return Err(EnumerationError::Unsupported(relative.to_path_buf())),
            },
            _ => return Err(EnumerationError::Unsupported(relative.to_path_buf())),
        }
    }
    Ok(parts.join("/"))
}
