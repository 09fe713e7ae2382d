//! Announces finished output files to downstream consumers (archive ingest,
//! catalog builders).

use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;

pub trait Publisher: Send + Sync {
    fn publish(&self, path: &Path) -> Result<()>;
}

/// Publishes nowhere.
pub struct NullPublisher;

impl Publisher for NullPublisher {
    fn publish(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

/// Fans each published path out to every live subscriber.
#[derive(Default)]
pub struct ChannelPublisher {
    subscribers: Mutex<Vec<Sender<PathBuf>>>,
}

impl ChannelPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<PathBuf> {
        let (tx, rx) = channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Publisher for ChannelPublisher {
    /// Subscribers whose receiver has been dropped are removed.
    fn publish(&self, path: &Path) -> Result<()> {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(path.to_path_buf()).is_ok());
        debug!(path = %path.display(), subscribers = subscribers.len(), "Published output");
        Ok(())
    }
}
