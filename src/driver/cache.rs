// This module implements the content-addressed program cache that sits between the
// generator and the downstream driver compiler. Keys are blake3 hashes of the device
// identifier and the emitted IL text, so identical source for the same device is compiled
// once. Binaries are kept in an in-memory map guarded by a RwLock and, when a directory
// is configured, mirrored to `<hex>.bin` files. Hits proceed concurrently under the read
// lock. A miss takes the write lock, checks the map again (another caller may have
// finished while this one waited), and only then compiles and stores, so concurrent
// callers with the same key observe one compilation and a blocking wait followed by a
// hit.

//! Content-addressed cache of compiled programs.

use super::device::Device;
use crate::core::CodegenError;
use hashbrown::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("compilation for {device} failed: {reason}")]
    Compile { device: String, reason: String },

    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error("program cache lock poisoned")]
    Poisoned,
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Hash of device identifier plus source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(blake3::Hash);

impl CacheKey {
    pub fn new(source: &str, device: &Device) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(device.id().as_bytes());
        hasher.update(&[0]);
        hasher.update(source.as_bytes());
        CacheKey(hasher.finalize())
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Downstream compiler from IL text to a device binary.
pub trait BinaryCompiler: Send + Sync {
    fn compile(&self, source: &str, device: &Device) -> CacheResult<Vec<u8>>;
}

/// Stores the IL text itself as the binary image.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextImageCompiler;

impl BinaryCompiler for TextImageCompiler {
    fn compile(&self, source: &str, _device: &Device) -> CacheResult<Vec<u8>> {
        Ok(source.as_bytes().to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookupSource {
    /// Already present in the in-memory map.
    Memory,
    /// Loaded from the cache directory.
    Disk,
    /// Compiled and inserted by this call.
    Compiled,
}

#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub source: CacheLookupSource,
    pub key: CacheKey,
    pub binary: Arc<[u8]>,
}

pub struct ProgramCache<C: BinaryCompiler> {
    compiler: C,
    entries: RwLock<HashMap<CacheKey, Arc<[u8]>>>,
    dir: Option<PathBuf>,
    compilations: AtomicUsize,
}

impl<C: BinaryCompiler> ProgramCache<C> {
    /// Memory-only cache.
    pub fn new(compiler: C) -> Self {
        Self {
            compiler,
            entries: RwLock::new(HashMap::new()),
            dir: None,
            compilations: AtomicUsize::new(0),
        }
    }

    /// Cache mirrored to `dir`, created if missing.
    pub fn with_dir(compiler: C, dir: impl Into<PathBuf>) -> CacheResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        let mut cache = Self::new(compiler);
        cache.dir = Some(dir);
        Ok(cache)
    }

    /// Number of times the downstream compiler ran.
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::SeqCst)
    }

    /// Number of binaries held in memory.
    pub fn len(&self) -> CacheResult<usize> {
        self.entries
            .read()
            .map(|map| map.len())
            .map_err(|_| CacheError::Poisoned)
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }

    fn path_for(&self, key: &CacheKey) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.bin", key.to_hex())))
    }

    fn load_from_disk(&self, key: &CacheKey) -> CacheResult<Option<Arc<[u8]>>> {
        let Some(path) = self.path_for(key) else {
            return Ok(None);
        };
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(Arc::from(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    fn store_to_disk(&self, key: &CacheKey, binary: &[u8]) -> CacheResult<()> {
        let Some(path) = self.path_for(key) else {
            return Ok(());
        };
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, binary).map_err(|e| CacheError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| CacheError::io(&path, e))
    }

    /// Return the binary for `source` on `device`, compiling it at most once.
    pub fn get_or_compile(&self, source: &str, device: &Device) -> CacheResult<CacheLookup> {
        let key = CacheKey::new(source, device);

        if let Some(binary) = self.entries.read().map_err(|_| CacheError::Poisoned)?.get(&key) {
            log::trace!("Program cache memory hit {}", key);
            return Ok(CacheLookup {
                source: CacheLookupSource::Memory,
                key,
                binary: binary.clone(),
            });
        }

        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        // Another caller may have stored it while this one waited for the lock.
        if let Some(binary) = entries.get(&key) {
            log::debug!("Program cache hit {} after waiting for writer", key);
            return Ok(CacheLookup {
                source: CacheLookupSource::Memory,
                key,
                binary: binary.clone(),
            });
        }

        if let Some(binary) = self.load_from_disk(&key)? {
            log::debug!("Program cache disk hit {}", key);
            entries.insert(key, binary.clone());
            return Ok(CacheLookup {
                source: CacheLookupSource::Disk,
                key,
                binary,
            });
        }

        log::debug!("Compiling program {} for {}", key, device);
        let binary: Arc<[u8]> = Arc::from(self.compiler.compile(source, device)?);
        self.compilations.fetch_add(1, Ordering::SeqCst);
        self.store_to_disk(&key, &binary)?;
        entries.insert(key, binary.clone());
        Ok(CacheLookup {
            source: CacheLookupSource::Compiled,
            key,
            binary,
        })
    }

    /// Drop the in-memory entries; disk files stay.
    pub fn clear_memory(&self) -> CacheResult<()> {
        self.entries
            .write()
            .map_err(|_| CacheError::Poisoned)?
            .clear();
        Ok(())
    }
}
