use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::context::SnapshotContext;
use crate::error::{Result, SnapshotError};
use crate::utils::format::format_bytes;
use crate::utils::io::copy_with_progress;

/// One dump artifact in the archive tier, possibly cached in the local tier.
#[derive(Clone)]
pub struct Snapshot {
    pub file_name: String,
    pub date: NaiveDateTime,
    pub plan_name: String,
    ctx: Arc<SnapshotContext>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadInfo {
    /// False when an existing cached copy was reused.
    pub downloaded: bool,
    pub local_file: String,
    pub bytes: u64,
}

impl Snapshot {
    pub(crate) fn new(file_name: impl Into<String>, date: NaiveDateTime, plan_name: &str, ctx: Arc<SnapshotContext>) -> Self {
        Self { file_name: file_name.into(), date, plan_name: plan_name.to_string(), ctx }
    }

    pub fn archive_file(&self) -> String {
        self.ctx.archive_file(&self.file_name)
    }

    pub fn local_file(&self) -> String {
        self.ctx.local_file(&self.file_name)
    }

    pub fn exists_locally(&self) -> bool {
        self.ctx.local.exists(&self.local_file())
    }

    /// Make the artifact available in the local tier.
    ///
    /// `force_download` always fetches from the archive, replacing whatever is
    /// cached. Otherwise a cached copy is reused as is. `use_local_copy`
    /// forbids contacting the archive, so a missing cached copy is an error.
    pub fn download(&self, use_local_copy: bool, force_download: bool) -> Result<DownloadInfo> {
        let local_file = self.local_file();

        if !force_download && self.exists_locally() {
            debug!(file = %self.file_name, "using cached copy");
            let bytes = self.ctx.local.size(&local_file)?;
            return Ok(DownloadInfo { downloaded: false, local_file, bytes });
        }
        if use_local_copy && !force_download {
            return Err(SnapshotError::execution(format!(
                "no local copy of {} is cached",
                self.file_name
            )));
        }

        self.ctx.message(&format!("Downloading {}", self.file_name));
        self.ctx.local.make_dir(self.ctx.local_path())?;

        let archive_file = self.archive_file();
        let total = self.ctx.archive.size(&archive_file)?;
        let copied = self.copy_from_archive(&archive_file, &local_file, total);
        match copied {
            Ok(bytes) => {
                debug!(file = %self.file_name, bytes, "downloaded");
                Ok(DownloadInfo { downloaded: true, local_file, bytes })
            }
            Err(e) => {
                let _ = self.ctx.local.delete(&local_file);
                Err(e)
            }
        }
    }

    fn copy_from_archive(&self, archive_file: &str, local_file: &str, total: u64) -> Result<u64> {
        let mut reader = self.ctx.archive.open(archive_file)?;
        let mut writer = self.ctx.local.create(local_file)?;
        let reporter = self.ctx.reporter.clone();
        let bytes = copy_with_progress(reader.as_mut(), writer.as_mut(), total, |done, all| {
            reporter.progress(done, all)
        })?;
        Ok(bytes)
    }

    /// Delete the archived artifact and any cached copy. Returns whether the
    /// archive deletion succeeded.
    pub fn remove(&self) -> bool {
        let removed = match self.ctx.archive.delete(&self.archive_file()) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(file = %self.file_name, error = %e, "failed to delete archived snapshot");
                false
            }
        };
        if let Err(e) = self.remove_local() {
            warn!(file = %self.file_name, error = %e, "failed to delete cached snapshot");
        }
        removed
    }

    pub fn remove_local(&self) -> Result<bool> {
        self.ctx.local.delete(&self.local_file())
    }

    pub fn size(&self) -> Result<u64> {
        self.ctx.archive.size(&self.archive_file())
    }

    pub fn formatted_size(&self) -> Result<String> {
        Ok(format_bytes(self.size()?))
    }
}
