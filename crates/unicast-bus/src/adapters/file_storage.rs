use crate::ports::SubscriptionStorage;
use async_trait::async_trait;
use bus_types::{Address, BusError, MessageType};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

type Table = BTreeMap<MessageType, BTreeSet<Address>>;

/// File-backed subscription store.
///
/// The whole table is kept in memory and rewritten as pretty JSON after every
/// change: written to `<path>.tmp`, synced, then renamed over `<path>`, so a
/// crash leaves either the old or the new table on disk, never a torn one.
/// File writes run on the blocking pool; reads are served from memory.
pub struct FileSubscriptionStorage {
    table: Mutex<Table>,
    writer: tokio::sync::Mutex<()>,
    path: PathBuf,
}

impl FileSubscriptionStorage {
    /// Open the store at `path`, loading existing subscriptions.
    ///
    /// A missing file is an empty store; an unreadable one is an error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BusError> {
        let path = path.as_ref().to_path_buf();
        let table = Self::load_from_file(&path)?;

        if table.is_empty() {
            info!(path = %path.display(), "No existing subscriptions");
        } else {
            info!(
                path = %path.display(),
                message_types = table.len(),
                "Loaded subscriptions"
            );
        }

        Ok(Self {
            table: Mutex::new(table),
            writer: tokio::sync::Mutex::new(()),
            path,
        })
    }

    fn load_from_file(path: &Path) -> Result<Table, BusError> {
        match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| BusError::Storage(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Table::new()),
            Err(e) => Err(io_error(path, e)),
        }
    }

    // Applies `change` and persists off the async runtime. Writers queue on
    // `writer`; the in-memory table is only replaced once the file write
    // succeeded, so readers never see an unpersisted change.
    async fn update(
        &self,
        change: impl FnOnce(&mut Table) -> bool + Send,
    ) -> Result<(), BusError> {
        let _writer = self.writer.lock().await;
        let mut next = self.table.lock().clone();
        if !change(&mut next) {
            return Ok(());
        }

        let path = self.path.clone();
        let next = tokio::task::spawn_blocking(move || save_to_file(&path, &next).map(|()| next))
            .await
            .map_err(|e| BusError::Storage(format!("subscription write task failed: {}", e)))??;
        *self.table.lock() = next;
        Ok(())
    }
}

fn save_to_file(path: &Path, table: &Table) -> Result<(), BusError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
    }

    let bytes = serde_json::to_vec_pretty(table).map_err(|e| BusError::Storage(e.to_string()))?;

    // Write atomically via temp file
    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path).map_err(|e| io_error(&temp_path, e))?;
    file.write_all(&bytes).map_err(|e| io_error(&temp_path, e))?;
    file.sync_all().map_err(|e| io_error(&temp_path, e))?;

    std::fs::rename(&temp_path, path).map_err(|e| io_error(path, e))?;

    debug!(path = %path.display(), bytes = bytes.len(), "Subscriptions persisted");
    Ok(())
}

fn io_error(path: &Path, error: std::io::Error) -> BusError {
    BusError::Storage(format!("{}: {}", path.display(), error))
}

#[async_trait]
impl SubscriptionStorage for FileSubscriptionStorage {
    async fn load(&self, message_type: &MessageType) -> Result<BTreeSet<Address>, BusError> {
        Ok(self
            .table
            .lock()
            .get(message_type)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, message_type: &MessageType, subscriber: &Address) -> Result<(), BusError> {
        self.update(|table| {
            table
                .entry(message_type.clone())
                .or_default()
                .insert(subscriber.clone())
        })
        .await
    }

    async fn remove(
        &self,
        message_type: &MessageType,
        subscriber: &Address,
    ) -> Result<(), BusError> {
        self.update(|table| {
            let Some(subscribers) = table.get_mut(message_type) else {
                return false;
            };
            let removed = subscribers.remove(subscriber);
            if subscribers.is_empty() {
                table.remove(message_type);
            }
            removed
        })
        .await
    }
}
