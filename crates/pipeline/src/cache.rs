//! Object cache: decides whether a source must be recompiled.
//!
//! The cache keeps no state in memory between runs. [`TimestampCache`] uses
//! the on-disk modification times of source and object as its only record,
//! so it is unaffected by process restarts but trusts the clock: skew or a
//! timestamp-preserving copy can make a stale object look fresh.
//! [`ContentHashCache`] trades that for a CRC-32 sidecar per object.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::BuildError;

/// Staleness oracle consulted once per source file per build.
pub trait StalenessOracle {
    /// `true` when `object` must be (re)built from `source`.
    fn needs_rebuild(&self, source: &Path, object: &Path) -> Result<bool, BuildError>;

    /// Called after `object` was successfully compiled from `source`.
    fn record(&self, _source: &Path, _object: &Path) -> Result<(), BuildError> {
        Ok(())
    }
}

/// Modification time of `path`, `None` if it does not exist.
pub fn modified(path: &Path) -> Result<Option<SystemTime>, BuildError> {
    match fs::metadata(path) {
        Ok(meta) => meta
            .modified()
            .map(Some)
            .map_err(|e| BuildError::io(path, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(BuildError::io(path, e)),
    }
}

/// Rebuild when the object is missing or the source is strictly newer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampCache;

impl StalenessOracle for TimestampCache {
    fn needs_rebuild(&self, source: &Path, object: &Path) -> Result<bool, BuildError> {
        let Some(object_time) = modified(object)? else {
            return Ok(true);
        };
        let source_time = modified(source)?.ok_or_else(|| {
            BuildError::io(source, io::Error::from(io::ErrorKind::NotFound))
        })?;
        Ok(source_time > object_time)
    }
}

/// Rebuild when the object is missing, the source contents changed since
/// the object was recorded, or the object is newer than its record.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHashCache;

impl ContentHashCache {
    /// Sidecar holding the source checksum, `<object>.crc`.
    pub fn sidecar(object: &Path) -> PathBuf {
        let mut name = OsString::from(object.as_os_str());
        name.push(".crc");
        PathBuf::from(name)
    }

    fn checksum(source: &Path) -> Result<u32, BuildError> {
        let bytes = fs::read(source).map_err(|e| BuildError::io(source, e))?;
        Ok(crc32fast::hash(&bytes))
    }
}

impl StalenessOracle for ContentHashCache {
    fn needs_rebuild(&self, source: &Path, object: &Path) -> Result<bool, BuildError> {
        let Some(object_time) = modified(object)? else {
            return Ok(true);
        };
        let sidecar = Self::sidecar(object);
        // An object rewritten after its sidecar was compiled without this
        // cache; the recorded checksum no longer describes it.
        match modified(&sidecar)? {
            Some(recorded_at) if recorded_at >= object_time => {}
            _ => return Ok(true),
        }
        let recorded = match fs::read_to_string(&sidecar) {
            Ok(text) => u32::from_str_radix(text.trim(), 16).ok(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(BuildError::io(sidecar, e)),
        };
        Ok(recorded != Some(Self::checksum(source)?))
    }

    fn record(&self, source: &Path, object: &Path) -> Result<(), BuildError> {
        let sidecar = Self::sidecar(object);
        let crc = Self::checksum(source)?;
        fs::write(&sidecar, format!("{crc:08x}\n")).map_err(|e| BuildError::io(sidecar, e))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_at(path: &Path, contents: &str, time: SystemTime) {
        fs::write(path, contents).unwrap();
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    fn base() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn missing_object_needs_rebuild() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("main.c");
        fs::write(&src, "int main(void){return 0;}").unwrap();
        assert!(TimestampCache
            .needs_rebuild(&src, &tmp.path().join("main.o"))
            .unwrap());
    }

    #[test]
    fn equal_timestamps_are_fresh() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("main.c");
        let obj = tmp.path().join("main.o");
        write_at(&src, "x", base());
        write_at(&obj, "o", base());
        assert!(!TimestampCache.needs_rebuild(&src, &obj).unwrap());
    }

    #[test]
    fn newer_source_needs_rebuild() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("main.c");
        let obj = tmp.path().join("main.o");
        write_at(&obj, "o", base());
        write_at(&src, "x", base() + Duration::from_secs(1));
        assert!(TimestampCache.needs_rebuild(&src, &obj).unwrap());
    }

    #[test]
    fn missing_source_is_an_io_error() {
        let tmp = TempDir::new().unwrap();
        let obj = tmp.path().join("main.o");
        fs::write(&obj, "o").unwrap();
        assert!(matches!(
            TimestampCache.needs_rebuild(&tmp.path().join("gone.c"), &obj),
            Err(BuildError::Io { .. })
        ));
    }

    #[test]
    fn hash_cache_ignores_touch_but_sees_edits() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("gpio.c");
        let obj = tmp.path().join("gpio.o");
        write_at(&src, "void gpio(void){}", base());
        fs::write(&obj, "o").unwrap();
        assert!(ContentHashCache.needs_rebuild(&src, &obj).unwrap());

        ContentHashCache.record(&src, &obj).unwrap();
        assert!(!ContentHashCache.needs_rebuild(&src, &obj).unwrap());

        // Newer mtime, same bytes.
        write_at(&src, "void gpio(void){}", base() + Duration::from_secs(60));
        assert!(!ContentHashCache.needs_rebuild(&src, &obj).unwrap());

        fs::write(&src, "void gpio(int pin){}").unwrap();
        assert!(ContentHashCache.needs_rebuild(&src, &obj).unwrap());
    }

    #[test]
    fn hash_record_older_than_object_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("main.c");
        let obj = tmp.path().join("main.o");
        fs::write(&src, "int main(void){return 0;}").unwrap();
        write_at(&obj, "o", base());
        ContentHashCache.record(&src, &obj).unwrap();
        assert!(!ContentHashCache.needs_rebuild(&src, &obj).unwrap());

        // Recompiled by another oracle after the record was written.
        write_at(&obj, "o2", SystemTime::now() + Duration::from_secs(60));
        assert!(ContentHashCache.needs_rebuild(&src, &obj).unwrap());
    }

    #[test]
    fn sidecar_sits_next_to_object() {
        let sidecar = ContentHashCache::sidecar(Path::new("/b/vega_objs/user/main.o"));
        assert_eq!(sidecar, Path::new("/b/vega_objs/user/main.o.crc"));
    }

    proptest! {
        #[test]
        fn rebuild_iff_source_strictly_newer(src_off in 0u64..10_000, obj_off in 0u64..10_000) {
            let tmp = TempDir::new().unwrap();
            let src = tmp.path().join("s.c");
            let obj = tmp.path().join("s.o");
            write_at(&src, "s", base() + Duration::from_secs(src_off));
            write_at(&obj, "o", base() + Duration::from_secs(obj_off));
            prop_assert_eq!(
                TimestampCache.needs_rebuild(&src, &obj).unwrap(),
                src_off > obj_off
            );
        }
    }
}
