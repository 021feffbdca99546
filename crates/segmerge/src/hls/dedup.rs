// Duplicate detection across concurrently running playlist tasks.
//
// A task fingerprints the raw bytes of its first three segments and
// publishes the fingerprint together with its working directory. A later
// task with the same fingerprint either yields (its directory is dropped)
// or, when it carries the longer directory name, hands that name to the
// existing output and stops.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tracing::{debug, info};

use crate::hls::HlsDownloaderError;

/// Number of leading segments that make up a fingerprint.
pub const FINGERPRINT_SEGMENTS: usize = 3;

const DIGEST_BUFFER: usize = 64 * 1024;

fn name_len(path: &Path) -> usize {
    path.file_name()
        .map(|name| name.to_string_lossy().chars().count())
        .unwrap_or(0)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `<dir>/<dir name>.<ext>`
pub fn media_path(dir: &Path, extension: &str) -> PathBuf {
    dir.join(format!("{}.{extension}", dir_name(dir)))
}

/// A task's working directory. Shared with the registry so a relocation is
/// seen by every worker that resolves a path afterwards.
#[derive(Debug, Clone)]
pub struct WorkDir {
    path: Arc<Mutex<PathBuf>>,
}

impl WorkDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(Mutex::new(path.into())),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.path.lock().clone()
    }

    pub fn join(&self, file_name: &str) -> PathBuf {
        self.path.lock().join(file_name)
    }

    pub fn name(&self) -> String {
        dir_name(&self.path.lock())
    }

    fn set(&self, path: PathBuf) {
        *self.path.lock() = path;
    }

    fn same_as(&self, other: &WorkDir) -> bool {
        Arc::ptr_eq(&self.path, &other.path)
    }
}

/// SHA-256 of a file's full content, hex encoded.
pub async fn digest_file(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; DIGEST_BUFFER];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Default)]
struct SlotState {
    digests: [Option<String>; FINGERPRINT_SEGMENTS],
    finalized: bool,
}

/// Per-task digest slots for segments 0, 1 and 2.
#[derive(Debug, Default)]
pub struct FingerprintSlots {
    state: Mutex<SlotState>,
}

impl FingerprintSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the digest of segment `index`. Returns the fingerprint to the
    /// one caller that fills the last empty slot; every other call gets `None`.
    pub fn record(&self, index: usize, digest: String) -> Option<String> {
        if index >= FINGERPRINT_SEGMENTS {
            return None;
        }
        let mut state = self.state.lock();
        state.digests[index] = Some(digest);
        if state.finalized || state.digests.iter().any(Option::is_none) {
            return None;
        }
        state.finalized = true;

        let mut hasher = Sha256::new();
        for digest in state.digests.iter().flatten() {
            hasher.update(digest.as_bytes());
        }
        Some(hex::encode(hasher.finalize()))
    }
}

/// Where the owning task of a claim stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStatus {
    Running,
    /// The owner merged its media file.
    Completed,
    Failed,
}

/// The registry's record of whose output holds a fingerprint.
#[derive(Debug)]
pub struct Claim {
    dir: WorkDir,
    /// Where the output should end up; longer-named duplicates overwrite it.
    desired: Mutex<PathBuf>,
    status: watch::Sender<ClaimStatus>,
}

impl Claim {
    fn new(dir: WorkDir) -> Self {
        let desired = dir.path();
        let (status, _) = watch::channel(ClaimStatus::Running);
        Self {
            dir,
            desired: Mutex::new(desired),
            status,
        }
    }

    pub fn dir(&self) -> &WorkDir {
        &self.dir
    }

    pub fn desired(&self) -> PathBuf {
        self.desired.lock().clone()
    }

    pub fn status(&self) -> ClaimStatus {
        *self.status.borrow()
    }

    /// Waits until the owner has either merged its output or failed.
    pub async fn finished(&self) -> ClaimStatus {
        let mut status = self.status.subscribe();
        match status.wait_for(|s| *s != ClaimStatus::Running).await {
            Ok(done) => *done,
            Err(_) => ClaimStatus::Failed,
        }
    }

    /// Only a running claim changes state; returns whether this call did it.
    fn conclude(&self, outcome: ClaimStatus) -> bool {
        self.status.send_if_modified(|status| {
            if *status != ClaimStatus::Running {
                return false;
            }
            *status = outcome;
            true
        })
    }
}

#[derive(Debug)]
pub enum Arbitration {
    /// This task owns the fingerprint and carries on.
    Owner(Arc<Claim>),
    /// Another output with an equal or longer name exists.
    Yield { owner: PathBuf, claim: Arc<Claim> },
    /// This task's name was handed to the existing output; settle it once
    /// the task's own workers have drained.
    Promote(Arc<Claim>),
}

/// How a promotion ended for the task that asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The owner's output now lives under the promoting task's name.
    Moved(PathBuf),
    /// An even longer-named duplicate took over the name meanwhile.
    Superseded(PathBuf),
}

/// Fingerprint claims for one batch of tasks.
#[derive(Debug, Default)]
pub struct DedupRegistry {
    claims: Mutex<HashMap<String, Arc<Claim>>>,
    reserved: Mutex<HashSet<PathBuf>>,
    rename_lock: AsyncMutex<()>,
}

impl DedupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out `<parent>/<name>`, or `<name> (2)`, `<name> (3)` and so on
    /// when an earlier task of this batch already holds that directory.
    pub fn reserve_dir(&self, parent: &Path, name: &str) -> PathBuf {
        let mut reserved = self.reserved.lock();
        let mut candidate = parent.join(name);
        let mut suffix = 2;
        while !reserved.insert(candidate.clone()) {
            candidate = parent.join(format!("{name} ({suffix})"));
            suffix += 1;
        }
        candidate
    }

    pub fn arbitrate(&self, fingerprint: &str, dir: &WorkDir) -> Arbitration {
        let mut claims = self.claims.lock();
        let Some(claim) = claims.get(fingerprint) else {
            let claim = Arc::new(Claim::new(dir.clone()));
            claims.insert(fingerprint.to_string(), Arc::clone(&claim));
            let path = dir.path();
            debug!(fingerprint, dir = %path.display(), "Registered content fingerprint");
            return Arbitration::Owner(claim);
        };

        if claim.dir.same_as(dir) {
            return Arbitration::Owner(Arc::clone(claim));
        }

        let own = dir.path();
        let mut desired = claim.desired.lock();
        if name_len(&desired) >= name_len(&own) {
            info!(
                fingerprint,
                owner = %desired.display(),
                duplicate = %own.display(),
                "Duplicate content, yielding to existing output"
            );
            Arbitration::Yield {
                owner: desired.clone(),
                claim: Arc::clone(claim),
            }
        } else {
            let current = claim.dir.path();
            info!(
                fingerprint,
                owner = %current.display(),
                renamed_to = %own.display(),
                "Duplicate content with a longer name, promoting its name"
            );
            *desired = own;
            Arbitration::Promote(Arc::clone(claim))
        }
    }

    /// Called by an owner once its media file is merged.
    pub fn complete(&self, claim: &Claim) {
        claim.conclude(ClaimStatus::Completed);
    }

    /// Called by an owner that failed: later duplicates start over, and
    /// every task waiting on the claim reports the failure. No-op for a
    /// claim that already concluded.
    pub fn release(&self, fingerprint: &str, claim: &Arc<Claim>) {
        if !claim.conclude(ClaimStatus::Failed) {
            return;
        }
        let mut claims = self.claims.lock();
        if claims
            .get(fingerprint)
            .is_some_and(|current| Arc::ptr_eq(current, claim))
        {
            claims.remove(fingerprint);
        }
    }

    /// Waits for the owner of `claim` to finish. Fails when it did not
    /// produce its output.
    pub async fn await_owner(&self, claim: &Claim) -> Result<(), HlsDownloaderError> {
        match claim.finished().await {
            ClaimStatus::Completed => Ok(()),
            _ => Err(HlsDownloaderError::DuplicateOwnerFailed(
                claim.dir.path().display().to_string(),
            )),
        }
    }

    /// Once the owner has merged, moves its directory to `own` (the
    /// promoting task's directory, already removed by that task) and
    /// renames the media file inside to match.
    pub async fn settle(
        &self,
        claim: &Claim,
        own: &Path,
        extension: &str,
    ) -> Result<Settlement, HlsDownloaderError> {
        self.await_owner(claim).await?;
        let _rename = self.rename_lock.lock().await;

        let target = claim.desired();
        if target != own {
            debug!(own = %own.display(), target = %target.display(), "Promotion superseded");
            return Ok(Settlement::Superseded(target));
        }

        let current = claim.dir.path();
        if current == target {
            return Ok(Settlement::Moved(media_path(&target, extension)));
        }
        if !tokio::fs::try_exists(&current).await.unwrap_or(false) {
            return Err(HlsDownloaderError::DuplicateOwnerFailed(
                current.display().to_string(),
            ));
        }

        tokio::fs::rename(&current, &target).await?;
        claim.dir.set(target.clone());

        let moved_media = target.join(format!("{}.{extension}", dir_name(&current)));
        let media = media_path(&target, extension);
        tokio::fs::rename(&moved_media, &media).await?;

        info!(from = %current.display(), to = %target.display(), "Relocated duplicate output");
        Ok(Settlement::Moved(media))
    }
}
