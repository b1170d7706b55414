//! One-file-per-entry store.
//!
//! Entries live under a two-level fan-out derived from the BLAKE3 hash of
//! the id, so no directory grows unbounded. Each file holds
//!
//! ```text
//! <expiry epoch seconds, 0 = never>\n<url-encoded id>\n<payload>
//! ```
//!
//! Writes land in a temporary file in the root directory and are renamed
//! into place, so readers never observe a partial entry. The file mtime is
//! set to the expiry which lets [`Store::has`] answer without reading the
//! file in the common case.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use cachette_common::time::epoch_secs;
use cachette_common::{Clock, SystemClock};
use cachette_core::{Store, StoreError, StoreResult};
use cachette_domain::{CacheError, CacheResult, FilesystemConfig};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

const BACKEND: &str = "filesystem";

/// Store writing one file per entry under a root directory.
#[derive(Clone)]
pub struct FilesystemStore {
    directory: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FilesystemStore {
    /// Open (creating if needed) the cache directory.
    ///
    /// # Errors
    ///
    /// [`CacheError::Storage`] when the directory cannot be created or is
    /// not writable; no degraded mode is possible then.
    #[instrument(skip(config), fields(directory = %config.directory.display()))]
    pub fn new(config: &FilesystemConfig) -> CacheResult<Self> {
        let directory = config.directory.clone();
        fs::create_dir_all(&directory).map_err(|e| {
            CacheError::Storage(format!(
                "cannot create cache directory {}: {e}",
                directory.display()
            ))
        })?;
        if !is_writable(&directory) {
            return Err(CacheError::Storage(format!(
                "cache directory is not writable ({})",
                directory.display()
            )));
        }
        info!(cache_adapter = BACKEND, directory = %directory.display(), "Filesystem store ready");
        Ok(Self { directory, clock: Arc::new(SystemClock) })
    }

    /// Use `clock` for expiry decisions.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Root directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, id: &str) -> PathBuf {
        let hash = blake3::hash(id.as_bytes()).to_hex();
        let hash = hash.as_str();
        self.directory.join(&hash[0..2]).join(&hash[2..4]).join(&hash[4..])
    }

    /// Read the entry for `id`, dropping it if expired.
    fn read(&self, id: &str, path: &Path) -> StoreResult<Option<Vec<u8>>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);
        let header = match read_header(&mut reader) {
            Ok(Some(header)) => header,
            Ok(None) => {
                debug!(
                    cache_adapter = BACKEND,
                    id,
                    path = %path.display(),
                    "Removing corrupt cache file"
                );
                remove_quietly(path);
                return Ok(None);
            }
            Err(e) => {
                debug!(
                    cache_adapter = BACKEND,
                    id,
                    path = %path.display(),
                    error = %e,
                    "Unreadable cache file"
                );
                return Ok(None);
            }
        };
        if header.is_expired(self.clock.epoch_secs()) {
            remove_quietly(path);
            return Ok(None);
        }
        if header.id != id {
            // Hash collision or foreign file.
            return Ok(None);
        }
        let mut payload = Vec::new();
        if let Err(e) = reader.read_to_end(&mut payload) {
            debug!(
                cache_adapter = BACKEND,
                id,
                path = %path.display(),
                error = %e,
                "Unreadable cache file"
            );
            return Ok(None);
        }
        Ok(Some(payload))
    }

    fn write(&self, id: &str, payload: &[u8], expiry: Option<f64>) -> StoreResult<()> {
        let path = self.path_for(id);
        let mut tmp = NamedTempFile::new_in(&self.directory)?;
        {
            let file = tmp.as_file_mut();
            writeln!(file, "{}", expiry.unwrap_or(0.0))?;
            writeln!(file, "{}", urlencoding::encode(id))?;
            file.write_all(payload)?;
            file.flush()?;
            if let Some(at) = expiry {
                let mtime = UNIX_EPOCH + Duration::from_secs_f64(at.max(0.0));
                if let Err(e) = file.set_modified(mtime) {
                    debug!(cache_adapter = BACKEND, error = %e, "Could not stamp expiry on mtime");
                }
            }
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    /// Every entry file below the fan-out directories.
    fn files(&self) -> StoreResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for level1 in read_dirs(&self.directory)? {
            for level2 in read_dirs(&level1)? {
                for entry in fs::read_dir(&level2)? {
                    let entry = entry?;
                    if entry.file_type()?.is_file() {
                        files.push(entry.path());
                    }
                }
            }
        }
        Ok(files)
    }
}

impl std::fmt::Debug for FilesystemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemStore")
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

impl Store for FilesystemStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn fetch_many(&self, ids: &[String]) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            let path = self.path_for(id);
            if let Some(payload) = self.read(id, &path)? {
                found.push((id.clone(), payload));
            }
        }
        Ok(found)
    }

    fn has(&self, id: &str) -> StoreResult<bool> {
        let path = self.path_for(id);
        let Ok(meta) = fs::metadata(&path) else {
            return Ok(false);
        };
        if meta.modified().is_ok_and(|mtime| epoch_secs(mtime) > self.clock.epoch_secs()) {
            return Ok(true);
        }
        Ok(self.read(id, &path)?.is_some())
    }

    fn save_many(&self, values: &[(String, Vec<u8>)], ttl: Duration) -> StoreResult<Vec<String>> {
        let expiry = (!ttl.is_zero()).then(|| self.clock.epoch_secs() + ttl.as_secs_f64());
        let mut failed = Vec::new();
        for (id, payload) in values {
            if let Err(e) = self.write(id, payload, expiry) {
                debug!(cache_adapter = BACKEND, id = %id, error = %e, "Failed to write cache file");
                failed.push(id.clone());
            }
        }
        if !failed.is_empty() && !is_writable(&self.directory) {
            return Err(StoreError::Structural(format!(
                "cache directory is not writable ({})",
                self.directory.display()
            )));
        }
        Ok(failed)
    }

    fn delete_many(&self, ids: &[String]) -> StoreResult<bool> {
        let mut ok = true;
        for id in ids {
            match fs::remove_file(self.path_for(id)) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    debug!(
                        cache_adapter = BACKEND,
                        id = %id,
                        error = %e,
                        "Failed to remove cache file"
                    );
                    ok = false;
                }
            }
        }
        Ok(ok)
    }

    fn clear(&self, prefix: &str) -> StoreResult<bool> {
        let mut ok = true;
        for path in self.files()? {
            let matches = prefix.is_empty()
                || match open_header(&path) {
                    Ok(Some(header)) => header.id.starts_with(prefix),
                    Ok(None) => false,
                    Err(e) => {
                        debug!(
                            cache_adapter = BACKEND,
                            path = %path.display(),
                            error = %e,
                            "Unreadable cache file"
                        );
                        false
                    }
                };
            if matches {
                if let Err(e) = fs::remove_file(&path) {
                    if e.kind() != ErrorKind::NotFound {
                        warn!(
                            cache_adapter = BACKEND,
                            path = %path.display(),
                            error = %e,
                            "Failed to remove cache file"
                        );
                        ok = false;
                    }
                }
            }
        }
        Ok(ok)
    }

    fn prune(&self) -> StoreResult<bool> {
        let now = self.clock.epoch_secs();
        let mut ok = true;
        for path in self.files()? {
            match open_header(&path) {
                Ok(Some(header)) if header.is_expired(now) => {
                    if let Err(e) = fs::remove_file(&path) {
                        if e.kind() != ErrorKind::NotFound {
                            ok = false;
                        }
                    }
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(_) => ok = false,
            }
        }
        Ok(ok)
    }
}

struct Header {
    expiry: f64,
    id: String,
}

impl Header {
    fn is_expired(&self, now: f64) -> bool {
        self.expiry > 0.0 && self.expiry <= now
    }
}

fn open_header(path: &Path) -> std::io::Result<Option<Header>> {
    read_header(&mut BufReader::new(File::open(path)?))
}

/// Parse the two header lines; `None` for a truncated or foreign file.
fn read_header<R: BufRead>(reader: &mut R) -> std::io::Result<Option<Header>> {
    let Some(expiry) = next_line(reader)? else {
        return Ok(None);
    };
    let Ok(expiry) = expiry.parse::<f64>() else {
        return Ok(None);
    };
    let Some(id) = next_line(reader)? else {
        return Ok(None);
    };
    let Ok(id) = urlencoding::decode(&id) else {
        return Ok(None);
    };
    Ok(Some(Header { expiry, id: id.into_owned() }))
}

/// One header line without its newline; `None` at EOF or for non-UTF-8.
fn next_line<R: BufRead>(reader: &mut R) -> std::io::Result<Option<String>> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    Ok(String::from_utf8(line).ok())
}

fn read_dirs(path: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

fn is_writable(directory: &Path) -> bool {
    NamedTempFile::new_in(directory).is_ok()
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            debug!(
                cache_adapter = BACKEND,
                path = %path.display(),
                error = %e,
                "Failed to remove expired file"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for stores::filesystem.
    use cachette_common::MockClock;
    use tempfile::TempDir;

    use super::*;

    fn store_in(dir: &TempDir, clock: &MockClock) -> FilesystemStore {
        FilesystemStore::new(&FilesystemConfig { directory: dir.path().to_path_buf() })
            .unwrap()
            .with_clock(Arc::new(clock.clone()))
    }

    fn entry(id: &str, payload: &[u8]) -> (String, Vec<u8>) {
        (id.to_string(), payload.to_vec())
    }

    /// Validates `FilesystemStore::save_many` and `fetch_many` for the
    /// basic write scenario.
    ///
    /// Assertions:
    /// - Confirms the payload reads back byte for byte, newlines included.
    /// - Confirms the file sits two fan-out levels below the root.
    #[test]
    fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::new();
        let store = store_in(&dir, &clock);
        let payload = b"line one\nline two\n\x00\xff";

        assert!(store.save_many(&[entry("ns:key", payload)], Duration::ZERO).unwrap().is_empty());
        let fetched = store.fetch_many(&["ns:key".to_string(), "ns:other".to_string()]).unwrap();
        assert_eq!(fetched, vec![entry("ns:key", payload)]);

        let path = store.path_for("ns:key");
        assert_eq!(path.parent().and_then(Path::parent).and_then(Path::parent), Some(dir.path()));
    }

    /// Validates read-side expiry for the TTL boundary scenario.
    ///
    /// Assertions:
    /// - Ensures the entry is live before the TTL elapses.
    /// - Ensures reading after expiry misses and deletes the file.
    #[test]
    fn test_expired_read_deletes_file() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::new();
        let store = store_in(&dir, &clock);
        store.save_many(&[entry("k", b"v")], Duration::from_secs(1)).unwrap();
        assert!(store.has("k").unwrap());

        clock.advance(Duration::from_millis(1_500));
        assert!(!store.has("k").unwrap());
        assert!(store.fetch_many(&["k".to_string()]).unwrap().is_empty());
        assert!(!store.path_for("k").exists());
    }

    /// Validates the id guard for the hash collision scenario.
    ///
    /// Assertions:
    /// - Ensures a file whose stored id differs from the request is a miss.
    #[test]
    fn test_id_mismatch_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::new();
        let store = store_in(&dir, &clock);
        store.save_many(&[entry("real", b"v")], Duration::ZERO).unwrap();

        let impostor = store.path_for("impostor");
        fs::create_dir_all(impostor.parent().unwrap()).unwrap();
        fs::copy(store.path_for("real"), &impostor).unwrap();
        assert!(store.fetch_many(&["impostor".to_string()]).unwrap().is_empty());
    }

    /// Validates `FilesystemStore::fetch_many` for a batch holding one
    /// damaged file.
    ///
    /// Assertions:
    /// - Confirms the intact entry is still returned.
    /// - Ensures the damaged entry is a miss and its file is removed.
    #[test]
    fn test_corrupt_file_does_not_break_batch() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::new();
        let store = store_in(&dir, &clock);
        let rows = [entry("app:good", b"fine"), entry("app:bad", b"lost")];
        store.save_many(&rows, Duration::ZERO).unwrap();
        fs::write(store.path_for("app:bad"), b"\xff\xfe\xfd\n\xff\npayload").unwrap();

        let ids = ["app:good".to_string(), "app:bad".to_string()];
        let found = store.fetch_many(&ids).unwrap();
        assert_eq!(found, vec![entry("app:good", b"fine")]);
        assert!(!store.path_for("app:bad").exists());
        assert!(!store.has("app:bad").unwrap());
    }

    /// Validates `FilesystemStore::clear` and `prune`.
    ///
    /// Assertions:
    /// - Confirms a prefix clear keeps ids outside the prefix.
    /// - Confirms prune removes only expired files.
    #[test]
    fn test_clear_and_prune() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::new();
        let store = store_in(&dir, &clock);
        let rows = [entry("a:1", b"1"), entry("a:2", b"2"), entry("b:1", b"3")];
        store.save_many(&rows, Duration::ZERO).unwrap();
        store.save_many(&[entry("b:short", b"4")], Duration::from_secs(1)).unwrap();

        assert!(store.clear("a:").unwrap());
        assert!(!store.has("a:1").unwrap());
        assert!(store.has("b:1").unwrap());

        clock.advance(Duration::from_secs(2));
        assert!(store.prune().unwrap());
        assert!(!store.path_for("b:short").exists());
        assert!(store.path_for("b:1").exists());

        assert!(store.clear("").unwrap());
        assert!(store.files().unwrap().is_empty());
    }

    /// Validates `FilesystemStore::delete_many` idempotence.
    ///
    /// Assertions:
    /// - Ensures deleting a missing id succeeds.
    #[test]
    fn test_delete_missing_is_success() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, &MockClock::new());
        assert!(store.delete_many(&["never-written".to_string()]).unwrap());
    }

    /// Validates `FilesystemStore::new` for a path that cannot be a
    /// directory.
    ///
    /// Assertions:
    /// - Ensures construction fails with a storage error.
    #[test]
    fn test_unusable_directory_is_structural() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();

        let result = FilesystemStore::new(&FilesystemConfig { directory: blocker.join("cache") });
        assert!(matches!(result, Err(CacheError::Storage(_))));
    }
}
