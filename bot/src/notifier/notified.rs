use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Where a newly notified id ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// Remembered and appended to the cache file.
    Persisted,
    /// Remembered for this run only.
    MemoryOnly,
}

/// Unique ids of clients that already received the notification.
///
/// Backed by an append-only file with one id per line. Ids are only ever
/// added. When the cache directory is missing the set still works, but
/// only for the lifetime of the process.
#[derive(Debug, Default)]
pub struct NotifiedSet {
    ids: HashSet<String>,
    cache_file: Option<PathBuf>,
    /// The file's last line has no terminator yet.
    unterminated: bool,
}

impl NotifiedSet {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load `cache_dir/file_name`. A missing directory disables persistence;
    /// a missing file is an empty set. An existing file that cannot be read
    /// is an error, since starting empty would re-notify everyone.
    pub async fn load(cache_dir: &Path, file_name: &str) -> io::Result<Self> {
        if !tokio::fs::try_exists(cache_dir).await.unwrap_or(false) {
            warn!(
                dir = %cache_dir.display(),
                "Cache directory does not exist, notified clients will not be persisted"
            );
            return Ok(Self::in_memory());
        }

        let path = cache_dir.join(file_name);
        let (ids, unterminated) = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => (
                parse_cache(&contents),
                !contents.is_empty() && !contents.ends_with('\n'),
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => (HashSet::new(), false),
            Err(e) => return Err(e),
        };

        info!(
            file = %path.display(),
            count = ids.len(),
            "Loaded notified clients"
        );

        Ok(NotifiedSet {
            ids,
            cache_file: Some(path),
            unterminated,
        })
    }

    pub fn contains(&self, unique_id: &str) -> bool {
        self.ids.contains(unique_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn is_persistent(&self) -> bool {
        self.cache_file.is_some()
    }

    /// Remember `unique_id` and append it to the cache before returning.
    /// A failed append is logged and the id is kept in memory.
    pub async fn record(&mut self, unique_id: &str) -> Recorded {
        if !self.ids.insert(unique_id.to_string()) {
            return if self.is_persistent() {
                Recorded::Persisted
            } else {
                Recorded::MemoryOnly
            };
        }

        let Some(path) = &self.cache_file else {
            return Recorded::MemoryOnly;
        };

        match append_line(path, unique_id, self.unterminated).await {
            Ok(()) => {
                self.unterminated = false;
                Recorded::Persisted
            }
            Err(e) => {
                warn!(
                    file = %path.display(),
                    error = %e,
                    %unique_id,
                    "Failed to persist notified client, keeping it in memory only"
                );
                Recorded::MemoryOnly
            }
        }
    }
}

fn parse_cache(contents: &str) -> HashSet<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Append `line`, first closing off an unterminated last line so the two
/// ids do not merge.
async fn append_line(path: &Path, line: &str, terminate_previous: bool) -> io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let data = if terminate_previous {
        format!("\n{}\n", line)
    } else {
        format!("{}\n", line)
    };
    file.write_all(data.as_bytes()).await?;
    file.flush().await?;
    file.sync_data().await
}
