//! Transfer Manager.
//!
//! Moves files between a local directory and the remote gateway with bounded
//! concurrency. Every file is retried independently; a file that keeps
//! failing is reported without stopping its siblings. Files whose identity
//! already matches on the destination are skipped, so repeating a transfer is
//! cheap.

use crate::archive;
use crate::retry::RetryPolicy;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use vip_core::config::{IdentityCheck, TransferConfig};
use vip_core::error::{Result, VipError};
use vip_core::gateway::{RemoteEntry, RemoteGateway};
use vip_core::remote_path::RemotePath;
use vip_core::workflow::OutputDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferDirection {
    Upload,
    Download,
}

/// One file to move. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    pub local: PathBuf,
    pub remote: RemotePath,
    pub direction: TransferDirection,
    /// Expected size in bytes, when known.
    pub expected_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferFailure {
    pub path: String,
    pub error: String,
}

/// Outcome of one upload or download call. Paths are remote paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub transferred: Vec<String>,
    /// Already present at the destination.
    pub skipped: Vec<String>,
    /// Reported as no longer existing remotely.
    pub missing: Vec<String>,
    pub failed: Vec<TransferFailure>,
}

impl TransferReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Paths now present at the destination.
    pub fn present(&self) -> impl Iterator<Item = &String> {
        self.transferred.iter().chain(self.skipped.iter())
    }

    pub fn merge(&mut self, other: TransferReport) {
        self.transferred.extend(other.transferred);
        self.skipped.extend(other.skipped);
        self.missing.extend(other.missing);
        self.failed.extend(other.failed);
    }

    fn sort(&mut self) {
        self.transferred.sort();
        self.skipped.sort();
        self.missing.sort();
        self.failed.sort_by(|a, b| a.path.cmp(&b.path));
    }
}

/// Where and how downloaded outputs land.
#[derive(Debug, Clone)]
pub struct DownloadRequest<'a> {
    pub outputs: &'a [OutputDescriptor],
    /// Remote directory mirrored under `local_root`.
    pub remote_root: &'a RemotePath,
    pub local_root: &'a Path,
    /// Paths already retrieved by an earlier call.
    pub already_downloaded: &'a BTreeSet<String>,
    /// Replace tar archives by their extracted content.
    pub extract: bool,
}

pub struct TransferManager {
    gateway: Arc<dyn RemoteGateway>,
    config: TransferConfig,
}

impl TransferManager {
    pub fn new(gateway: Arc<dyn RemoteGateway>, config: TransferConfig) -> Self {
        Self { gateway, config }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::for_transfers(&self.config)
    }

    // ------------------------------------------------------------------
    // Upload
    // ------------------------------------------------------------------

    /// Mirrors every file below `local_root` into `remote_location`.
    pub async fn upload(
        &self,
        local_root: &Path,
        remote_location: &RemotePath,
    ) -> Result<TransferReport> {
        if !local_root.is_dir() {
            return Err(VipError::invalid_input(format!(
                "local input location '{}' is not a directory",
                local_root.display()
            )));
        }

        let mut files = Vec::new();
        collect_files(local_root, local_root, &mut files)?;
        files.sort();
        tracing::info!(
            "Uploading {} file(s) from {} to {}",
            files.len(),
            local_root.display(),
            remote_location
        );

        // Remote directories, parents first.
        let mut directories: BTreeSet<RemotePath> = BTreeSet::new();
        directories.insert(remote_location.clone());
        for relative in &files {
            if let Some(parent) = remote_location.join_local(relative).parent() {
                directories.insert(parent);
            }
        }

        let mut listings: BTreeMap<RemotePath, RemoteEntry> = BTreeMap::new();
        for dir in &directories {
            for entry in self.ensure_remote_dir(dir).await? {
                listings.insert(entry.path.clone(), entry);
            }
        }

        let mut report = TransferReport::default();
        let mut tasks = Vec::new();
        for relative in files {
            let local = local_root.join(&relative);
            let remote = remote_location.join_local(&relative);
            let size = tokio::fs::metadata(&local).await?.len();

            let same = match listings.get(&remote) {
                Some(entry) if !entry.is_directory => {
                    self.same_identity(&local, size, entry).await?
                }
                _ => false,
            };
            if same {
                tracing::debug!("Skipping {}: already on remote", remote);
                report.skipped.push(remote.to_string());
                continue;
            }
            tasks.push(TransferTask {
                local,
                remote,
                direction: TransferDirection::Upload,
                expected_size: Some(size),
            });
        }

        report.merge(self.run(tasks, false).await?);
        report.sort();
        self.log_report(TransferDirection::Upload, &report);
        Ok(report)
    }

    /// Creates `dir` when missing and returns its current entries.
    async fn ensure_remote_dir(&self, dir: &RemotePath) -> Result<Vec<RemoteEntry>> {
        let gateway = self.gateway.as_ref();
        let policy = self.retry_policy();
        let label = format!("listing {}", dir);

        if !policy.run(&label, move || gateway.exists(dir)).await? {
            tracing::debug!("Creating remote directory {}", dir);
            policy
                .run(&label, move || gateway.create_dir(dir))
                .await?;
            return Ok(Vec::new());
        }

        match policy.run(&label, move || gateway.list_directory(dir)).await {
            Ok(entries) => Ok(entries),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn same_identity(&self, local: &Path, size: u64, remote: &RemoteEntry) -> Result<bool> {
        if let (IdentityCheck::ContentHash, Some(remote_hash)) =
            (self.config.identity, remote.hash.as_deref())
        {
            let content = tokio::fs::read(local).await?;
            let local_hash = hex::encode(Sha256::digest(&content));
            return Ok(local_hash.eq_ignore_ascii_case(remote_hash));
        }
        Ok(remote.size == Some(size))
    }

    // ------------------------------------------------------------------
    // Download
    // ------------------------------------------------------------------

    /// Retrieves outputs below `local_root`, mirroring their position
    /// relative to `remote_root`.
    pub async fn download(&self, request: DownloadRequest<'_>) -> Result<TransferReport> {
        let mut report = TransferReport::default();
        let mut tasks = Vec::new();

        for output in request.outputs {
            let key = output.path.to_string();
            if request.already_downloaded.contains(&key) {
                report.skipped.push(key);
                continue;
            }
            if output.is_missing() {
                tracing::warn!("Output {} no longer exists remotely", output.path);
                report.missing.push(key);
                continue;
            }

            let local = local_destination(request.remote_root, request.local_root, &output.path);
            if already_local(&local, output.size).await {
                tracing::debug!("Skipping {}: already at {}", output.path, local.display());
                report.skipped.push(key);
                continue;
            }
            tasks.push(TransferTask {
                local,
                remote: output.path.clone(),
                direction: TransferDirection::Download,
                expected_size: output.size,
            });
        }

        if !tasks.is_empty() {
            tracing::info!(
                "Downloading {} file(s) to {}",
                tasks.len(),
                request.local_root.display()
            );
        }
        report.merge(self.run(tasks, request.extract).await?);
        report.sort();
        self.log_report(TransferDirection::Download, &report);
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Worker pool
    // ------------------------------------------------------------------

    /// Runs every task with at most `concurrency` in flight and joins them all.
    async fn run(&self, tasks: Vec<TransferTask>, extract: bool) -> Result<TransferReport> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for task in tasks {
            let semaphore = Arc::clone(&semaphore);
            let gateway = Arc::clone(&self.gateway);
            let policy = self.retry_policy();
            join_set.spawn(async move {
                let key = task.remote.to_string();
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => transfer_one(gateway.as_ref(), &policy, &task, extract).await,
                    Err(e) => Err(VipError::internal(format!("transfer pool closed: {}", e))),
                };
                (key, outcome)
            });
        }

        let mut report = TransferReport::default();
        while let Some(joined) = join_set.join_next().await {
            let (key, outcome) =
                joined.map_err(|e| VipError::internal(format!("transfer task panicked: {}", e)))?;
            match outcome {
                Ok(()) => report.transferred.push(key),
                Err(e) => {
                    tracing::error!("Transfer of {} failed: {}", key, e);
                    report.failed.push(TransferFailure {
                        path: key,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    fn log_report(&self, direction: TransferDirection, report: &TransferReport) {
        tracing::info!(
            "{:?} finished: {} transferred, {} skipped, {} missing, {} failed",
            direction,
            report.transferred.len(),
            report.skipped.len(),
            report.missing.len(),
            report.failed.len()
        );
    }
}

async fn transfer_one(
    gateway: &dyn RemoteGateway,
    policy: &RetryPolicy,
    task: &TransferTask,
    extract: bool,
) -> Result<()> {
    let local = task.local.as_path();
    let remote = &task.remote;
    match task.direction {
        TransferDirection::Upload => {
            let label = format!("upload of {}", remote);
            policy
                .run(&label, move || gateway.upload_file(local, remote))
                .await
        }
        TransferDirection::Download => {
            if let Some(parent) = local.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let partial = partial_path(local);
            let label = format!("download of {}", remote);
            let fetched = {
                let partial = partial.as_path();
                policy
                    .run(&label, move || gateway.download_file(remote, partial))
                    .await
            };
            if let Err(e) = fetched {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
            tokio::fs::rename(&partial, local).await?;

            if let Some(expected) = task.expected_size {
                let actual = tokio::fs::metadata(local).await?.len();
                if actual != expected {
                    tracing::warn!(
                        "{}: expected {} bytes, received {}",
                        remote,
                        expected,
                        actual
                    );
                }
            }

            if extract {
                let path = local.to_path_buf();
                let extracted = tokio::task::spawn_blocking(move || archive::extract_in_place(&path))
                    .await
                    .map_err(|e| VipError::internal(format!("extraction task panicked: {}", e)))?;
                if let Err(e) = extracted {
                    tracing::warn!("Keeping {} as is: {:#}", local.display(), e);
                }
            }
            Ok(())
        }
    }
}

/// Whether a complete copy of an output already sits at `local`. A file of
/// the wrong size is a leftover and gets fetched again.
async fn already_local(local: &Path, expected_size: Option<u64>) -> bool {
    match tokio::fs::metadata(local).await {
        Ok(meta) if meta.is_file() => expected_size.is_none_or(|size| meta.len() == size),
        Ok(_) => true,
        Err(_) => false,
    }
}

/// Sibling path a download is written to before it is moved into place.
fn partial_path(local: &Path) -> PathBuf {
    let name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    local.with_file_name(format!(".{}.part", name))
}

/// Local path of a remote output: its position below `remote_root`, or its
/// bare file name when it lives elsewhere.
fn local_destination(remote_root: &RemotePath, local_root: &Path, remote: &RemotePath) -> PathBuf {
    let relative = remote
        .strip_prefix(remote_root)
        .filter(|rest| !rest.is_empty())
        .or_else(|| remote.file_name())
        .unwrap_or_default();
    relative
        .split('/')
        .filter(|part| !part.is_empty() && *part != "..")
        .fold(local_root.to_path_buf(), |acc, part| acc.join(part))
}

/// Collects files below `dir` as paths relative to `root`.
fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_path_buf());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vip_core::config::BackoffStrategy;
    use vip_infrastructure::InMemoryGateway;

    fn config() -> TransferConfig {
        TransferConfig {
            concurrency: 2,
            max_retries: 2,
            retry_delay_ms: 1,
            backoff: BackoffStrategy::Fixed,
            identity: IdentityCheck::NameAndSize,
        }
    }

    fn dataset() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.nii"), b"aaaa").unwrap();
        std::fs::create_dir(temp_dir.path().join("sub")).unwrap();
        std::fs::write(temp_dir.path().join("sub").join("b.nii"), b"bb").unwrap();
        temp_dir
    }

    #[tokio::test]
    async fn test_upload_mirrors_the_tree_and_is_idempotent() {
        let local = dataset();
        let gateway = Arc::new(InMemoryGateway::new());
        let manager = TransferManager::new(gateway.clone(), config());
        let remote = RemotePath::new("/vip/Home/API/s/INPUTS");

        let first = manager.upload(local.path(), &remote).await.unwrap();
        assert_eq!(
            first.transferred,
            vec![
                "/vip/Home/API/s/INPUTS/a.nii".to_string(),
                "/vip/Home/API/s/INPUTS/sub/b.nii".to_string(),
            ]
        );
        assert!(gateway.has_directory("/vip/Home/API/s/INPUTS/sub"));
        assert_eq!(
            gateway.file("/vip/Home/API/s/INPUTS/sub/b.nii"),
            Some(b"bb".to_vec())
        );

        let uploads = gateway.counters().uploads;
        let second = manager.upload(local.path(), &remote).await.unwrap();
        assert!(second.transferred.is_empty());
        assert_eq!(second.skipped.len(), 2);
        assert_eq!(gateway.counters().uploads, uploads);
    }

    #[tokio::test]
    async fn test_changed_file_is_uploaded_again() {
        let local = dataset();
        let gateway = Arc::new(InMemoryGateway::new());
        let manager = TransferManager::new(gateway.clone(), config());
        let remote = RemotePath::new("/vip/Home/API/s/INPUTS");
        manager.upload(local.path(), &remote).await.unwrap();

        std::fs::write(local.path().join("a.nii"), b"a longer content").unwrap();
        let report = manager.upload(local.path(), &remote).await.unwrap();
        assert_eq!(report.transferred, vec!["/vip/Home/API/s/INPUTS/a.nii".to_string()]);
    }

    #[tokio::test]
    async fn test_content_hash_identity() {
        let local = dataset();
        let gateway = Arc::new(InMemoryGateway::new());
        let manager = TransferManager::new(
            gateway.clone(),
            TransferConfig {
                identity: IdentityCheck::ContentHash,
                ..config()
            },
        );
        let remote = RemotePath::new("/vip/Home/API/s/INPUTS");
        manager.upload(local.path(), &remote).await.unwrap();

        // Same size, different bytes.
        std::fs::write(local.path().join("a.nii"), b"zzzz").unwrap();
        let report = manager.upload(local.path(), &remote).await.unwrap();
        assert_eq!(report.transferred, vec!["/vip/Home/API/s/INPUTS/a.nii".to_string()]);
        assert_eq!(report.skipped, vec!["/vip/Home/API/s/INPUTS/sub/b.nii".to_string()]);
    }

    #[tokio::test]
    async fn test_per_file_retry_and_isolation() {
        let local = dataset();
        let gateway = Arc::new(InMemoryGateway::new());
        let manager = TransferManager::new(gateway.clone(), config());
        let remote = RemotePath::new("/vip/Home/API/s/INPUTS");

        // Recovers within the retry budget.
        gateway.fail_uploads("/vip/Home/API/s/INPUTS/a.nii", 2);
        // Exceeds it.
        gateway.fail_uploads("/vip/Home/API/s/INPUTS/sub/b.nii", 5);

        let report = manager.upload(local.path(), &remote).await.unwrap();
        assert_eq!(report.transferred, vec!["/vip/Home/API/s/INPUTS/a.nii".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, "/vip/Home/API/s/INPUTS/sub/b.nii");
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn test_download_skips_recorded_present_and_missing_outputs() {
        let local = TempDir::new().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        let manager = TransferManager::new(gateway.clone(), config());
        let root = RemotePath::new("/vip/Home/API/s/OUTPUTS");

        gateway.put_file("/vip/Home/API/s/OUTPUTS/w1/a.txt", b"a".to_vec());
        gateway.put_file("/vip/Home/API/s/OUTPUTS/w1/b.txt", b"b".to_vec());
        gateway.put_file("/vip/Home/API/s/OUTPUTS/w1/c.txt", b"c".to_vec());
        std::fs::create_dir_all(local.path().join("w1")).unwrap();
        std::fs::write(local.path().join("w1").join("b.txt"), b"b").unwrap();

        let mut gone = OutputDescriptor::new("/vip/Home/API/s/OUTPUTS/w1/d.txt");
        gone.exists = Some(false);
        let outputs = vec![
            OutputDescriptor::new("/vip/Home/API/s/OUTPUTS/w1/a.txt"),
            OutputDescriptor::new("/vip/Home/API/s/OUTPUTS/w1/b.txt"),
            OutputDescriptor::new("/vip/Home/API/s/OUTPUTS/w1/c.txt"),
            gone,
        ];
        let already: BTreeSet<String> =
            ["/vip/Home/API/s/OUTPUTS/w1/a.txt".to_string()].into_iter().collect();

        let report = manager
            .download(DownloadRequest {
                outputs: &outputs,
                remote_root: &root,
                local_root: local.path(),
                already_downloaded: &already,
                extract: false,
            })
            .await
            .unwrap();

        assert_eq!(report.transferred, vec!["/vip/Home/API/s/OUTPUTS/w1/c.txt".to_string()]);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.missing, vec!["/vip/Home/API/s/OUTPUTS/w1/d.txt".to_string()]);
        assert_eq!(gateway.counters().downloads, 1);
        assert_eq!(
            std::fs::read(local.path().join("w1").join("c.txt")).unwrap(),
            b"c"
        );
    }

    #[tokio::test]
    async fn test_download_failure_is_reported_per_file() {
        let local = TempDir::new().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        let manager = TransferManager::new(gateway.clone(), config());
        let root = RemotePath::new("/vip/out");

        gateway.put_file("/vip/out/ok.txt", b"ok".to_vec());
        gateway.put_file("/vip/out/bad.txt", b"bad".to_vec());
        gateway.fail_downloads("/vip/out/bad.txt", 10);

        let outputs = vec![
            OutputDescriptor::new("/vip/out/ok.txt"),
            OutputDescriptor::new("/vip/out/bad.txt"),
        ];
        let report = manager
            .download(DownloadRequest {
                outputs: &outputs,
                remote_root: &root,
                local_root: local.path(),
                already_downloaded: &BTreeSet::new(),
                extract: false,
            })
            .await
            .unwrap();

        assert_eq!(report.transferred, vec!["/vip/out/ok.txt".to_string()]);
        assert_eq!(report.failed[0].path, "/vip/out/bad.txt");
        // 1 + 2 retries for the failing file, 1 for the other.
        assert_eq!(gateway.counters().downloads, 4);
    }

    #[tokio::test]
    async fn test_interrupted_download_is_fetched_again() {
        let local = TempDir::new().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        let manager = TransferManager::new(gateway.clone(), config());
        let root = RemotePath::new("/vip/out");

        gateway.put_file("/vip/out/r.txt", b"full-content".to_vec());
        gateway.truncate_downloads("/vip/out/r.txt", 3);
        let outputs = vec![OutputDescriptor::new("/vip/out/r.txt")];
        let request = DownloadRequest {
            outputs: &outputs,
            remote_root: &root,
            local_root: local.path(),
            already_downloaded: &BTreeSet::new(),
            extract: false,
        };

        let first = manager.download(request.clone()).await.unwrap();
        assert_eq!(first.failed[0].path, "/vip/out/r.txt");
        assert!(!local.path().join("r.txt").exists());
        assert!(!local.path().join(".r.txt.part").exists());

        let second = manager.download(request).await.unwrap();
        assert_eq!(second.transferred, vec!["/vip/out/r.txt".to_string()]);
        assert!(second.skipped.is_empty());
        assert_eq!(
            std::fs::read(local.path().join("r.txt")).unwrap(),
            b"full-content"
        );
    }

    #[tokio::test]
    async fn test_local_file_of_the_wrong_size_is_replaced() {
        let local = TempDir::new().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        let manager = TransferManager::new(gateway.clone(), config());
        let root = RemotePath::new("/vip/out");

        gateway.put_file("/vip/out/r.txt", b"full-content".to_vec());
        std::fs::write(local.path().join("r.txt"), b"full").unwrap();
        let mut output = OutputDescriptor::new("/vip/out/r.txt");
        output.size = Some(12);

        let report = manager
            .download(DownloadRequest {
                outputs: &[output],
                remote_root: &root,
                local_root: local.path(),
                already_downloaded: &BTreeSet::new(),
                extract: false,
            })
            .await
            .unwrap();
        assert_eq!(report.transferred, vec!["/vip/out/r.txt".to_string()]);
        assert_eq!(
            std::fs::read(local.path().join("r.txt")).unwrap(),
            b"full-content"
        );
    }

    #[tokio::test]
    async fn test_unrelated_directory_does_not_hide_an_output() {
        let local = TempDir::new().unwrap();
        let gateway = Arc::new(InMemoryGateway::new());
        let manager = TransferManager::new(gateway.clone(), config());
        let root = RemotePath::new("/vip/out");

        gateway.put_file("/vip/out/w/a.txt", b"a".to_vec());
        std::fs::create_dir_all(local.path().join("w").join("a")).unwrap();
        let outputs = vec![OutputDescriptor::new("/vip/out/w/a.txt")];

        let report = manager
            .download(DownloadRequest {
                outputs: &outputs,
                remote_root: &root,
                local_root: local.path(),
                already_downloaded: &BTreeSet::new(),
                extract: true,
            })
            .await
            .unwrap();
        assert_eq!(report.transferred, vec!["/vip/out/w/a.txt".to_string()]);
        assert_eq!(std::fs::read(local.path().join("w").join("a.txt")).unwrap(), b"a");
    }

    #[test]
    fn test_local_destination() {
        let root = RemotePath::new("/vip/Home/API/s/OUTPUTS");
        let local = Path::new("/data/out");
        assert_eq!(
            local_destination(&root, local, &RemotePath::new("/vip/Home/API/s/OUTPUTS/w/r.tgz")),
            PathBuf::from("/data/out/w/r.tgz")
        );
        assert_eq!(
            local_destination(&root, local, &RemotePath::new("/vip/elsewhere/r.tgz")),
            PathBuf::from("/data/out/r.tgz")
        );
    }
}
