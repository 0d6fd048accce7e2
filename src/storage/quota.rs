use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Host storage estimate, consulted once at init
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaEstimate {
    pub usage: u64,
    pub quota: Option<u64>,
}

pub trait QuotaEstimator: Send + Sync {
    /// Best effort; `None` when the host cannot tell
    fn estimate(&self) -> Option<QuotaEstimate>;
}

/// Estimator for hosts that expose nothing
pub struct NoQuota;

impl QuotaEstimator for NoQuota {
    fn estimate(&self) -> Option<QuotaEstimate> {
        None
    }
}

/// Sums file sizes under a data directory against an optional quota
pub struct DataDirQuota {
    dir: PathBuf,
    quota: Option<u64>,
}

impl DataDirQuota {
    pub fn new(dir: impl Into<PathBuf>, quota: Option<u64>) -> Self {
        Self {
            dir: dir.into(),
            quota,
        }
    }
}

fn dir_usage(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_usage(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

impl QuotaEstimator for DataDirQuota {
    fn estimate(&self) -> Option<QuotaEstimate> {
        match dir_usage(&self.dir) {
            Ok(usage) => Some(QuotaEstimate {
                usage,
                quota: self.quota,
            }),
            Err(e) => {
                tracing::debug!(dir = %self.dir.display(), error = %e, "storage estimate unavailable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_dir_usage_sums_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), vec![0u8; 100]).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("b"), vec![0u8; 23]).unwrap();

        let estimate = DataDirQuota::new(dir.path(), Some(1000)).estimate().unwrap();
        assert_eq!(estimate.usage, 123);
        assert_eq!(estimate.quota, Some(1000));
    }

    #[test]
    fn test_missing_dir_has_no_estimate() {
        assert!(DataDirQuota::new("/definitely/not/here", None).estimate().is_none());
    }
}
