use std::collections::BTreeMap;
use std::sync::Arc;
use anyhow::bail;
use async_trait::async_trait;
use tokio::sync::RwLock;
use crate::storage::{DestinationSink, SinkFactory};

#[derive(Default)]
struct InMemoryFile {
    data: Vec<u8>,
    finished: bool,
}

/// A [SinkFactory] that keeps destination files in memory, keyed by destination name. Opening a
///  name again truncates it, like creating a file would.
#[derive(Clone, Default)]
pub struct InMemorySinkFactory {
    files: Arc<RwLock<BTreeMap<String, InMemoryFile>>>,
    fail_on_open: bool,
}

impl InMemorySinkFactory {
    pub fn new() -> InMemorySinkFactory {
        Default::default()
    }

    /// a factory that refuses to open anything, like a read-only output directory
    pub fn failing() -> InMemorySinkFactory {
        InMemorySinkFactory {
            fail_on_open: true,
            ..Default::default()
        }
    }

    pub async fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.files.read().await
            .get(name)
            .map(|f| f.data.clone())
    }

    pub async fn is_finished(&self, name: &str) -> bool {
        self.files.read().await
            .get(name)
            .map(|f| f.finished)
            .unwrap_or(false)
    }

    pub async fn names(&self) -> Vec<String> {
        self.files.read().await
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SinkFactory for InMemorySinkFactory {
    async fn open(&self, destination_name: &str) -> anyhow::Result<Box<dyn DestinationSink>> {
        if self.fail_on_open {
            bail!("opening {:?} is configured to fail", destination_name);
        }

        self.files.write().await
            .insert(destination_name.to_string(), InMemoryFile::default());
        Ok(Box::new(InMemorySink {
            name: destination_name.to_string(),
            files: self.files.clone(),
        }))
    }
}

struct InMemorySink {
    name: String,
    files: Arc<RwLock<BTreeMap<String, InMemoryFile>>>,
}

#[async_trait]
impl DestinationSink for InMemorySink {
    async fn write_segment(&mut self, data: &[u8]) -> anyhow::Result<()> {
        match self.files.write().await.get_mut(&self.name) {
            Some(file) if !file.finished => {
                file.data.extend_from_slice(data);
                Ok(())
            }
            _ => bail!("{:?} is not open for writing", self.name),
        }
    }

    async fn finish(&mut self) -> anyhow::Result<()> {
        if let Some(file) = self.files.write().await.get_mut(&self.name) {
            file.finished = true;
        }
        Ok(())
    }
}
