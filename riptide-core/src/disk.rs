//! Pre-admission disk utilization checks.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{CoreError, Result};
use crate::retention::RetentionSweeper;

/// Rejects new admissions when the download directory's filesystem is too
/// full, after giving the sweeper one chance to reclaim space.
#[derive(Debug)]
pub struct DiskGuard {
    path: PathBuf,
    max_used_percent: f64,
}

impl DiskGuard {
    pub fn new(path: PathBuf, max_used_percent: f64) -> Self {
        Self {
            path,
            max_used_percent,
        }
    }

    /// Used/total percentage of the filesystem holding the download
    /// directory. A failed probe degrades to 0% rather than blocking
    /// admission.
    pub fn usage_percent(&self) -> f64 {
        match filesystem_usage(&self.path) {
            Ok(percent) => percent,
            Err(e) => {
                warn!("disk usage probe failed for {}: {}", self.path.display(), e);
                0.0
            }
        }
    }

    /// Gate a submission on disk headroom: above the threshold, run one
    /// sweep and re-check; still above, reject with `InsufficientSpace`.
    pub async fn check_admission(&self, sweeper: &RetentionSweeper) -> Result<()> {
        let used = self.usage_percent();
        if used <= self.max_used_percent {
            return Ok(());
        }

        warn!(
            "disk usage at {used:.1}% (limit {:.1}%), sweeping before admission",
            self.max_used_percent
        );
        if let Err(e) = sweeper.sweep().await {
            warn!("admission-triggered sweep failed: {e:#}");
        }

        if self.usage_percent() > self.max_used_percent {
            return Err(CoreError::InsufficientSpace);
        }

        Ok(())
    }
}

#[cfg(unix)]
fn filesystem_usage(path: &Path) -> std::io::Result<f64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::other("path contains a NUL byte"))?;

    let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &raw mut stats) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }

    let frsize = stats.f_frsize as u64;
    let total = (stats.f_blocks as u64).saturating_mul(frsize);
    let available = (stats.f_bavail as u64).saturating_mul(frsize);

    if total == 0 {
        return Ok(0.0);
    }
    Ok((total.saturating_sub(available)) as f64 / total as f64 * 100.0)
}

#[cfg(not(unix))]
fn filesystem_usage(_path: &Path) -> std::io::Result<f64> {
    Ok(0.0)
}
