use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Seconds after which an abandoned lock file is considered stale.
const STALE_LOCK_SECS: i64 = 60;

/// Write content atomically: temp file in the same directory, fsync, rename.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let temp_path = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));

    let mut file = std::fs::File::create(&temp_path)
        .with_context(|| format!("cannot create temp file for {}", path.display()))?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("cannot rename temp to {}", path.display()))?;
    Ok(())
}

/// How often a long-running holder should call [`AdvisoryLock::refresh`].
pub const LOCK_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// Advisory lock held while a CLI invocation mutates state.
///
/// The `.lock` file next to the guarded path records the holder's pid, the
/// time of acquisition or last refresh, and an owner token. A lock whose time
/// is older than a minute is stale and may be taken over. Released on drop,
/// and only while the file still carries this holder's token.
#[derive(Debug)]
pub struct AdvisoryLock {
    lock_path: Option<PathBuf>,
    token: String,
}

impl AdvisoryLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut name = path.as_os_str().to_owned();
        name.push(".lock");
        let lock_path = PathBuf::from(name);

        if lock_path.exists() {
            let content = std::fs::read_to_string(&lock_path).unwrap_or_default();
            let acquired_at = content.lines().nth(1).and_then(|ts| ts.parse::<i64>().ok());
            match acquired_at {
                Some(ts) if chrono::Utc::now().timestamp() - ts > STALE_LOCK_SECS => {
                    tracing::warn!(lock = %lock_path.display(), "removing stale state lock");
                    let _ = std::fs::remove_file(&lock_path);
                }
                _ => bail!(
                    "state is locked by another process (lock: {})",
                    lock_path.display()
                ),
            }
        }

        let token = uuid::Uuid::new_v4().simple().to_string();
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .with_context(|| format!("cannot acquire lock {}", lock_path.display()))?;
        file.write_all(lock_content(&token).as_bytes())?;

        Ok(Self {
            lock_path: Some(lock_path),
            token,
        })
    }

    /// Bump the lock's timestamp so it does not go stale while held.
    pub fn refresh(&self) -> Result<()> {
        let Some(path) = &self.lock_path else {
            return Ok(());
        };
        if !self.is_owned(path) {
            bail!("state lock {} was taken over by another process", path.display());
        }
        atomic_write(path, lock_content(&self.token).as_bytes())
    }

    pub fn release(mut self) -> Result<()> {
        if let Some(path) = self.lock_path.take() {
            if self.is_owned(&path) {
                std::fs::remove_file(&path)
                    .with_context(|| format!("cannot release lock {}", path.display()))?;
            }
        }
        Ok(())
    }

    fn is_owned(&self, path: &Path) -> bool {
        std::fs::read_to_string(path)
            .map(|content| content.lines().nth(2) == Some(self.token.as_str()))
            .unwrap_or(false)
    }
}

fn lock_content(token: &str) -> String {
    format!(
        "{}\n{}\n{token}\n",
        std::process::id(),
        chrono::Utc::now().timestamp()
    )
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        if let Some(path) = self.lock_path.take() {
            if self.is_owned(&path) {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}
