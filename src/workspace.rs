//! Per-request scratch space on disk.
//!
//! A [`Workspace`] owns three directories under its root:
//!
//! ```text
//! <root>/uploads/<id>.zip      the archive a request brought (or a copy of the default)
//! <root>/extracted/<id>/       the unpacked archive
//! <root>/outputs/<id>/         a persisted index
//! <root>/outputs/<id>.zip      the downloadable package
//! ```
//!
//! Every request gets its own [`WorkUnit`] with a fresh v4 UUID, so
//! concurrent requests never touch each other's paths. A unit is released
//! by value, which removes all four paths; wrapping it in a
//! [`ReleaseGuard`] ties that release to the guard's lifetime.

use std::fmt;
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::Result;

const UPLOADS: &str = "uploads";
const EXTRACTED: &str = "extracted";
const OUTPUTS: &str = "outputs";

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create the workspace directories if missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for sub in [UPLOADS, EXTRACTED, OUTPUTS] {
            std::fs::create_dir_all(root.join(sub))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn allocate(&self) -> WorkUnit {
        let id = Uuid::new_v4();
        let name = id.to_string();
        WorkUnit {
            id,
            upload_path: self.root.join(UPLOADS).join(format!("{}.zip", name)),
            extract_dir: self.root.join(EXTRACTED).join(&name),
            index_dir: self.root.join(OUTPUTS).join(&name),
            package_path: self.root.join(OUTPUTS).join(format!("{}.zip", name)),
        }
    }
}

/// The isolated set of paths belonging to one request.
///
/// Not `Clone`: [`WorkUnit::release`] takes `self`, so a unit is released
/// at most once.
#[derive(Debug)]
pub struct WorkUnit {
    id: Uuid,
    upload_path: PathBuf,
    extract_dir: PathBuf,
    index_dir: PathBuf,
    package_path: PathBuf,
}

impl WorkUnit {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// First eight hex digits of the id, for file names shown to users.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    pub fn upload_path(&self) -> &Path {
        &self.upload_path
    }

    pub fn extract_dir(&self) -> &Path {
        &self.extract_dir
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn package_path(&self) -> &Path {
        &self.package_path
    }

    /// Remove every path of this unit.
    ///
    /// Each removal is attempted independently; a path that is already
    /// gone counts as removed.
    pub fn release(self) -> CleanupReport {
        let mut report = CleanupReport {
            id: self.id,
            failures: Vec::new(),
        };

        for file in [&self.upload_path, &self.package_path] {
            if let Err(e) = std::fs::remove_file(file) {
                report.record(file, e);
            }
        }
        for dir in [&self.extract_dir, &self.index_dir] {
            if let Err(e) = std::fs::remove_dir_all(dir) {
                report.record(dir, e);
            }
        }
        report
    }
}

/// Paths that could not be removed when a unit was released.
#[derive(Debug)]
pub struct CleanupReport {
    pub id: Uuid,
    pub failures: Vec<(PathBuf, io::Error)>,
}

impl CleanupReport {
    fn record(&mut self, path: &Path, err: io::Error) {
        if err.kind() != io::ErrorKind::NotFound {
            self.failures.push((path.to_path_buf(), err));
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn log(&self) {
        if self.is_clean() {
            tracing::debug!(unit = %self.id, "released work unit");
            return;
        }
        for (path, err) in &self.failures {
            tracing::warn!(unit = %self.id, path = %path.display(), error = %err, "cleanup failed");
        }
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit {}: {} cleanup failure(s)", self.id, self.failures.len())
    }
}

/// Releases its [`WorkUnit`] when dropped.
///
/// Inside a tokio runtime the removal is handed to the blocking pool and
/// not awaited, so dropping the guard never stalls a response. Outside a
/// runtime it runs inline.
#[derive(Debug)]
pub struct ReleaseGuard {
    unit: Option<WorkUnit>,
}

impl ReleaseGuard {
    pub fn new(unit: WorkUnit) -> Self {
        Self { unit: Some(unit) }
    }

    /// Release on the current thread and return the report.
    pub fn release_now(mut self) -> Option<CleanupReport> {
        self.unit.take().map(WorkUnit::release)
    }
}

impl Deref for ReleaseGuard {
    type Target = WorkUnit;

    fn deref(&self) -> &WorkUnit {
        match &self.unit {
            Some(unit) => unit,
            None => unreachable!("work unit taken before drop"),
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some(unit) = self.unit.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || unit.release().log());
            }
            Err(_) => unit.release().log(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn populate(unit: &WorkUnit) {
        std::fs::write(unit.upload_path(), b"zip").unwrap();
        std::fs::create_dir_all(unit.extract_dir().join("nested")).unwrap();
        std::fs::write(unit.extract_dir().join("nested").join("a.txt"), b"a").unwrap();
        std::fs::create_dir_all(unit.index_dir()).unwrap();
        std::fs::write(unit.package_path(), b"pkg").unwrap();
    }

    fn all_gone(unit_paths: &[PathBuf]) -> bool {
        unit_paths.iter().all(|p| !p.exists())
    }

    fn paths(unit: &WorkUnit) -> Vec<PathBuf> {
        vec![
            unit.upload_path().to_path_buf(),
            unit.extract_dir().to_path_buf(),
            unit.index_dir().to_path_buf(),
            unit.package_path().to_path_buf(),
        ]
    }

    #[test]
    fn open_creates_layout() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::open(tmp.path().join("ws")).unwrap();
        for sub in [UPLOADS, EXTRACTED, OUTPUTS] {
            assert!(ws.root().join(sub).is_dir());
        }
    }

    #[test]
    fn units_are_distinct() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::open(tmp.path()).unwrap();
        let ids: HashSet<Uuid> = (0..500).map(|_| ws.allocate().id()).collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn paths_are_namespaced_by_id() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::open(tmp.path()).unwrap();
        let unit = ws.allocate();
        let id = unit.id().to_string();
        for p in paths(&unit) {
            assert!(p.to_string_lossy().contains(&id));
            assert!(p.starts_with(tmp.path()));
        }
        assert_eq!(unit.short_id().len(), 8);
    }

    #[test]
    fn release_removes_everything() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::open(tmp.path()).unwrap();
        let unit = ws.allocate();
        populate(&unit);
        let p = paths(&unit);

        let report = unit.release();
        assert!(report.is_clean(), "{}", report);
        assert!(all_gone(&p));
    }

    #[test]
    fn release_of_untouched_unit_is_clean() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::open(tmp.path()).unwrap();
        assert!(ws.allocate().release().is_clean());
    }

    #[test]
    fn guard_releases_inline_outside_runtime() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::open(tmp.path()).unwrap();
        let guard = ReleaseGuard::new(ws.allocate());
        populate(&guard);
        let p = paths(&guard);
        drop(guard);
        assert!(all_gone(&p));
    }

    #[tokio::test]
    async fn release_now_is_synchronous() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::open(tmp.path()).unwrap();
        let guard = ReleaseGuard::new(ws.allocate());
        populate(&guard);
        let p = paths(&guard);
        let report = guard.release_now().unwrap();
        assert!(report.is_clean());
        assert!(all_gone(&p));
    }

    #[tokio::test]
    async fn guard_releases_in_background_inside_runtime() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::open(tmp.path()).unwrap();
        let guard = ReleaseGuard::new(ws.allocate());
        populate(&guard);
        let p = paths(&guard);
        drop(guard);

        for _ in 0..100 {
            if all_gone(&p) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("work unit was not released");
    }
}
