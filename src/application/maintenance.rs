//! Periodic reclamation of export archives, abandoned working areas, and old uploads.
//!
//! Runs independently of the export pipeline on the same storage directories. Exports never
//! wait for it and never rely on it having run.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use metrics::counter;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::application::export::STAGING_DIR_NAME;

const SOURCE: &str = "application::maintenance";

#[derive(Debug, Clone)]
pub struct MaintenancePlan {
    pub output_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub output_retention: Duration,
    pub upload_retention: Duration,
    pub include_uploads: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub archives_removed: usize,
    pub working_areas_removed: usize,
    pub uploads_removed: usize,
    pub failures: usize,
}

impl MaintenanceReport {
    pub fn removed(&self) -> usize {
        self.archives_removed + self.working_areas_removed + self.uploads_removed
    }
}

/// Run one reclamation pass. Entries whose modification time is older than `now` minus the
/// relevant retention are removed; failures are logged and counted, never propagated.
pub fn reclaim(plan: &MaintenancePlan, now: SystemTime) -> MaintenanceReport {
    let mut report = MaintenanceReport::default();

    reclaim_outputs(plan, now, &mut report);
    if plan.include_uploads {
        reclaim_uploads(plan, now, &mut report);
    }

    counter!("mdport_maintenance_removed_total").increment(report.removed() as u64);
    info!(
        target = SOURCE,
        op = "maintenance::reclaim",
        archives = report.archives_removed,
        working_areas = report.working_areas_removed,
        uploads = report.uploads_removed,
        failures = report.failures,
        "maintenance pass finished"
    );

    report
}

fn reclaim_outputs(plan: &MaintenancePlan, now: SystemTime, report: &mut MaintenanceReport) {
    for path in list_dir(&plan.output_dir) {
        if !is_expired(&path, now, plan.output_retention) {
            continue;
        }
        if path.is_file() && path.extension().is_some_and(|ext| ext == "zip") {
            match fs::remove_file(&path) {
                Ok(()) => report.archives_removed += 1,
                Err(err) => record_failure(report, &path, &err),
            }
        }
    }

    for path in list_dir(&plan.output_dir.join(STAGING_DIR_NAME)) {
        if !is_expired(&path, now, plan.output_retention) {
            continue;
        }
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => report.working_areas_removed += 1,
            Err(err) => record_failure(report, &path, &err),
        }
    }
}

fn reclaim_uploads(plan: &MaintenancePlan, now: SystemTime, report: &mut MaintenanceReport) {
    if !plan.uploads_dir.is_dir() {
        return;
    }

    for entry in WalkDir::new(&plan.uploads_dir)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if entry.file_type().is_file() {
            if is_expired(path, now, plan.upload_retention) {
                match fs::remove_file(path) {
                    Ok(()) => report.uploads_removed += 1,
                    Err(err) => record_failure(report, path, &err),
                }
            }
        } else if entry.file_type().is_dir() && is_expired(path, now, plan.upload_retention) {
            // contents_first visits children first; fresh dirs may be receiving an upload
            match fs::remove_dir(path) {
                Ok(()) => {}
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::DirectoryNotEmpty | io::ErrorKind::NotFound
                    ) => {}
                Err(err) => record_failure(report, path, &err),
            }
        }
    }
}

fn list_dir(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn is_expired(path: &Path, now: SystemTime, retention: Duration) -> bool {
    let Ok(modified) = fs::metadata(path).and_then(|meta| meta.modified()) else {
        return false;
    };
    now.duration_since(modified)
        .map(|age| age >= retention)
        .unwrap_or(false)
}

fn record_failure(report: &mut MaintenanceReport, path: &Path, err: &io::Error) {
    report.failures += 1;
    warn!(
        target = SOURCE,
        op = "maintenance::reclaim",
        path = %path.display(),
        error = %err,
        "failed to remove expired entry"
    );
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn plan(root: &Path, include_uploads: bool, retention: Duration) -> MaintenancePlan {
        MaintenancePlan {
            output_dir: root.join("output"),
            uploads_dir: root.join("uploads"),
            output_retention: retention,
            upload_retention: retention,
            include_uploads,
        }
    }

    fn seed(root: &Path) {
        fs::create_dir_all(root.join("output/.staging/user_1_x")).expect("staging");
        fs::write(root.join("output/.staging/user_1_x/export.md"), "x").expect("md");
        fs::write(root.join("output/markdown_export_a.zip"), "zip").expect("zip");
        fs::write(root.join("output/notes.txt"), "keep").expect("other");
        fs::create_dir_all(root.join("uploads/1/2024-01-01")).expect("uploads");
        fs::write(root.join("uploads/1/2024-01-01/a.png"), "png").expect("upload");
    }

    #[test]
    fn removes_expired_archives_and_working_areas() {
        let root = TempDir::new().expect("root");
        seed(root.path());

        let later = SystemTime::now() + Duration::from_secs(10);
        let report = reclaim(&plan(root.path(), false, Duration::from_secs(1)), later);

        assert_eq!(report.archives_removed, 1);
        assert_eq!(report.working_areas_removed, 1);
        assert_eq!(report.uploads_removed, 0);
        assert!(!root.path().join("output/markdown_export_a.zip").exists());
        assert!(root.path().join("output/notes.txt").exists());
        assert!(root.path().join("uploads/1/2024-01-01/a.png").exists());
    }

    #[test]
    fn keeps_fresh_entries() {
        let root = TempDir::new().expect("root");
        seed(root.path());

        let report = reclaim(
            &plan(root.path(), true, Duration::from_secs(3600)),
            SystemTime::now(),
        );

        assert_eq!(report.removed(), 0);
        assert!(root.path().join("output/markdown_export_a.zip").exists());
    }

    #[test]
    fn prunes_uploads_and_empty_directories() {
        let root = TempDir::new().expect("root");
        seed(root.path());

        let later = SystemTime::now() + Duration::from_secs(10);
        let report = reclaim(&plan(root.path(), true, Duration::from_secs(1)), later);

        assert_eq!(report.uploads_removed, 1);
        assert!(root.path().join("uploads").is_dir());
        assert!(!root.path().join("uploads/1").exists());
    }

    #[test]
    fn missing_directories_are_not_an_error() {
        let root = TempDir::new().expect("root");
        let report = reclaim(&plan(root.path(), true, Duration::ZERO), SystemTime::now());
        assert_eq!(report, MaintenanceReport::default());
    }

    #[test]
    fn fresh_empty_upload_directories_survive() {
        let root = TempDir::new().expect("root");
        fs::create_dir_all(root.path().join("uploads/4/2024-06-01")).expect("fresh dir");

        let report = reclaim(
            &plan(root.path(), true, Duration::from_secs(3600)),
            SystemTime::now(),
        );

        assert_eq!(report, MaintenanceReport::default());
        assert!(root.path().join("uploads/4/2024-06-01").is_dir());
    }
}
