//! Where class bytes come from.
//!
//! Hierarchy questions are answered from class files, looked up by internal name through a
//! [`ClassSource`]. The agent reads them through the defining class loader (see
//! `crate::jvm::source`); tools and tests use the sources in this module:
//!
//! - [`MemorySource`] - classes held in memory
//! - [`DirectorySource`] - a class directory on disk, files memory-mapped on lookup and
//!   handed out as [`ClassBytes::Mapped`]
//! - [`ChainSource`] - several sources searched in order, like a class path
//!
//! # Examples
//!
//! ```rust
//! use threadscope::hierarchy::{ChainSource, ClassSource, MemorySource};
//!
//! let mut app = MemorySource::new();
//! app.insert("com/example/Worker", vec![0xCA, 0xFE, 0xBA, 0xBE]);
//!
//! let chain = ChainSource::new(vec![Box::new(MemorySource::new()), Box::new(app)]);
//! assert!(chain.load("com/example/Worker")?.is_some());
//! assert!(chain.load("com/example/Missing")?.is_none());
//! # Ok::<(), threadscope::Error>(())
//! ```

use std::{
    collections::HashMap,
    fmt, fs,
    io::ErrorKind,
    ops::Deref,
    path::{Path, PathBuf},
};

use memmap2::Mmap;

use crate::{Error, Result};

/// Class file bytes handed out by a [`ClassSource`].
pub enum ClassBytes {
    /// Bytes held in memory
    Owned(Vec<u8>),
    /// A class file mapped from disk, read in place
    Mapped(Mmap),
}

impl Deref for ClassBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            ClassBytes::Owned(bytes) => bytes,
            ClassBytes::Mapped(mmap) => mmap,
        }
    }
}

impl From<Vec<u8>> for ClassBytes {
    fn from(bytes: Vec<u8>) -> Self {
        ClassBytes::Owned(bytes)
    }
}

impl fmt::Debug for ClassBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ClassBytes::Owned(_) => "Owned",
            ClassBytes::Mapped(_) => "Mapped",
        };
        write!(f, "{kind}({} bytes)", self.len())
    }
}

/// A lookup of class file bytes by internal name (`java/lang/Thread`).
pub trait ClassSource {
    /// Load the class file for `internal_name`.
    ///
    /// A class the source does not know is `Ok(None)`, not an error.
    ///
    /// # Errors
    /// Returns an error if the class exists but could not be read.
    fn load(&self, internal_name: &str) -> Result<Option<ClassBytes>>;
}

impl<S: ClassSource + ?Sized> ClassSource for &S {
    fn load(&self, internal_name: &str) -> Result<Option<ClassBytes>> {
        (**self).load(internal_name)
    }
}

impl<S: ClassSource + ?Sized> ClassSource for Box<S> {
    fn load(&self, internal_name: &str) -> Result<Option<ClassBytes>> {
        (**self).load(internal_name)
    }
}

/// Classes held in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    classes: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the class `internal_name`.
    pub fn insert(&mut self, internal_name: &str, bytes: Vec<u8>) -> &mut Self {
        self.classes.insert(internal_name.to_string(), bytes);
        self
    }

    /// Number of classes held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether no class is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ClassSource for MemorySource {
    fn load(&self, internal_name: &str) -> Result<Option<ClassBytes>> {
        Ok(self.classes.get(internal_name).cloned().map(ClassBytes::Owned))
    }
}

/// A class directory laid out by package (`<root>/java/lang/Thread.class`).
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    /// Create a source over the directory `root`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if `root` does not exist and [`crate::Error::Error`]
    /// if it is not a directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let metadata = fs::metadata(root)?;
        if !metadata.is_dir() {
            return Err(Error::Error(format!("{} is not a directory", root.display())));
        }

        Ok(DirectorySource {
            root: root.to_path_buf(),
        })
    }

    /// The directory this source reads from.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the class file for `internal_name`.
    #[must_use]
    pub fn path_of(&self, internal_name: &str) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(internal_name.split('/'));
        path.set_extension("class");
        path
    }
}

impl ClassSource for DirectorySource {
    fn load(&self, internal_name: &str) -> Result<Option<ClassBytes>> {
        if internal_name
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..")
        {
            return Ok(None);
        }

        let file = match fs::File::open(self.path_of(internal_name)) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(Error::FileError(error)),
        };

        if file.metadata()?.len() == 0 {
            return Ok(Some(ClassBytes::Owned(Vec::new())));
        }

        // SAFETY: the mapping is read-only and class files are not rewritten while a lookup
        // holds them.
        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(error) => return Err(Error::Error(error.to_string())),
        };

        Ok(Some(ClassBytes::Mapped(mmap)))
    }
}

/// Several sources searched in order; the first hit wins.
#[derive(Default)]
pub struct ChainSource {
    sources: Vec<Box<dyn ClassSource>>,
}

impl ChainSource {
    /// Create a chain over `sources`, searched front to back.
    #[must_use]
    pub fn new(sources: Vec<Box<dyn ClassSource>>) -> Self {
        ChainSource { sources }
    }

    /// Append a source to the end of the chain.
    pub fn push(&mut self, source: Box<dyn ClassSource>) -> &mut Self {
        self.sources.push(source);
        self
    }
}

impl ClassSource for ChainSource {
    fn load(&self, internal_name: &str) -> Result<Option<ClassBytes>> {
        for source in &self.sources {
            if let Some(bytes) = source.load(internal_name)? {
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("com").join("example");
        fs::create_dir_all(&package).unwrap();
        fs::write(package.join("Worker.class"), [0xCA, 0xFE, 0xBA, 0xBE]).unwrap();

        let source = DirectorySource::new(dir.path()).unwrap();
        let worker = source.load("com/example/Worker").unwrap().unwrap();
        assert!(matches!(worker, ClassBytes::Mapped(_)));
        assert_eq!(&worker[..], [0xCA, 0xFE, 0xBA, 0xBE]);
        assert!(source.load("com/example/Missing").unwrap().is_none());
        assert!(source.load("../etc/passwd").unwrap().is_none());
    }

    #[test]
    fn directory_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"x").unwrap();

        assert!(matches!(
            DirectorySource::new(dir.path().join("absent")),
            Err(Error::FileError(_))
        ));
        assert!(matches!(DirectorySource::new(&file), Err(Error::Error(_))));
    }

    #[test]
    fn chain_prefers_earlier_sources() {
        let mut first = MemorySource::new();
        first.insert("a/B", vec![1]);
        let mut second = MemorySource::new();
        second.insert("a/B", vec![2]).insert("a/C", vec![3]);

        let chain = ChainSource::new(vec![Box::new(first), Box::new(second)]);
        assert_eq!(chain.load("a/B").unwrap().as_deref(), Some(&[1u8][..]));
        assert_eq!(chain.load("a/C").unwrap().as_deref(), Some(&[3u8][..]));
        assert!(chain.load("a/D").unwrap().is_none());
    }
}
