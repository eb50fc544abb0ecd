use crate::error::MailpoolError;
use crate::store::record::{AccountId, CredentialRecord, RecordState};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, error, info, warn};

const LIVE_SUFFIX: &str = ".json";
const RETIRED_SUFFIX: &str = ".json.used";

/// Result of a retirement rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireOutcome {
    Renamed,
    AlreadyRetired,
}

/// Outcome of one pass over the retired records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: usize,
    pub failed: usize,
}

/// Directory of credential records, one file per account.
///
/// The filename suffix encodes [`RecordState`]; nothing outside this type
/// knows the literal markers.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Open the store, creating the directory if it does not exist yet.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, MailpoolError> {
        let store = Self::new(dir);
        if fs::metadata(&store.dir).await.is_err() {
            fs::create_dir_all(&store.dir)
                .await
                .map_err(|e| MailpoolError::store(&store.dir, e))?;
            info!(path = %store.dir.display(), "created accounts directory");
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &AccountId, state: RecordState) -> PathBuf {
        let suffix = match state {
            RecordState::Live => LIVE_SUFFIX,
            RecordState::Retired => RETIRED_SUFFIX,
        };
        self.dir.join(format!("{}{suffix}", id.file_stem()))
    }

    /// Reconstruct an account and its state from a file name.
    fn classify(file_name: &str) -> Option<(AccountId, RecordState)> {
        if let Some(stem) = file_name.strip_suffix(RETIRED_SUFFIX) {
            return AccountId::from_file_stem(stem).map(|id| (id, RecordState::Retired));
        }
        let stem = file_name.strip_suffix(LIVE_SUFFIX)?;
        AccountId::from_file_stem(stem).map(|id| (id, RecordState::Live))
    }

    async fn scan(&self) -> Result<Vec<(AccountId, RecordState, PathBuf)>, MailpoolError> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| MailpoolError::store(&self.dir, e))?;
        let mut found = Vec::new();

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(path = %self.dir.display(), error = %e, "failed to read accounts dir entry");
                    continue;
                }
            };
            let path = entry.path();
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match Self::classify(name) {
                Some((id, state)) => found.push((id, state, path)),
                None if name.ends_with(LIVE_SUFFIX) || name.ends_with(RETIRED_SUFFIX) => {
                    warn!(file = name, "skipping record with unexpected name format");
                }
                None => {}
            }
        }
        Ok(found)
    }

    /// All accounts that have not been retired.
    pub async fn list_live(&self) -> Result<Vec<AccountId>, MailpoolError> {
        let live: Vec<AccountId> = self
            .scan()
            .await?
            .into_iter()
            .filter(|(_, state, _)| *state == RecordState::Live)
            .map(|(id, _, _)| id)
            .collect();
        debug!(count = live.len(), "listed live records");
        Ok(live)
    }

    /// Current persisted state of an account, `None` if no file exists.
    pub async fn state_of(&self, id: &AccountId) -> Result<Option<RecordState>, MailpoolError> {
        for state in [RecordState::Live, RecordState::Retired] {
            let path = self.path_for(id, state);
            match fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => return Ok(Some(state)),
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(MailpoolError::store(path, e)),
            }
        }
        Ok(None)
    }

    /// Read a live record.
    ///
    /// Fails with `MissingRecord` if there is no live file for `id`.
    pub async fn load(&self, id: &AccountId) -> Result<CredentialRecord, MailpoolError> {
        let path = self.path_for(id, RecordState::Live);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(MailpoolError::MissingRecord(id.clone()));
            }
            Err(e) => return Err(MailpoolError::store(path, e)),
        };
        CredentialRecord::from_json(id, &bytes)
    }

    /// Rename a live record to its retired form. Idempotent.
    pub async fn retire(&self, id: &AccountId) -> Result<RetireOutcome, MailpoolError> {
        let live = self.path_for(id, RecordState::Live);
        let retired = self.path_for(id, RecordState::Retired);

        if fs::try_exists(&retired)
            .await
            .map_err(|e| MailpoolError::store(&retired, e))?
        {
            warn!(email = %id, "record already retired");
            return Ok(RetireOutcome::AlreadyRetired);
        }

        match fs::rename(&live, &retired).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(MailpoolError::MissingRecord(id.clone()));
            }
            Err(e) => return Err(MailpoolError::store(live, e)),
        }

        // Retention is measured from retirement, not from the last credential write.
        if let Err(e) = touch(&retired).await {
            warn!(email = %id, error = %e, "failed to stamp retirement time");
        }
        Ok(RetireOutcome::Renamed)
    }

    /// Delete retired records whose modification time is older than `max_age`
    /// relative to `now`. Per-file failures are logged and counted.
    pub async fn sweep_retired(
        &self,
        max_age: Duration,
        now: SystemTime,
    ) -> Result<SweepReport, MailpoolError> {
        let mut report = SweepReport::default();

        for (id, state, path) in self.scan().await? {
            if state != RecordState::Retired {
                continue;
            }
            let modified = match fs::metadata(&path).await.and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    error!(email = %id, path = %path.display(), error = %e, "failed to stat retired record");
                    report.failed += 1;
                    continue;
                }
            };
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= max_age {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => {
                    report.deleted += 1;
                    info!(email = %id, age_hours = age.as_secs() / 3600, "deleted retired record");
                }
                Err(e) => {
                    error!(email = %id, path = %path.display(), error = %e, "failed to delete retired record");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

async fn touch(path: &Path) -> std::io::Result<()> {
    let file = fs::OpenOptions::new().write(true).open(path).await?;
    file.into_std().await.set_modified(SystemTime::now())
}
