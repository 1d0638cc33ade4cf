//! File system access on both sides of a transfer. The protocol engine only talks to these
//!  traits, so tests can run against in-memory data.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::debug;

/// Random-access read side: the sender reads every segment on every (re)transmission
#[async_trait]
pub trait SegmentSource: Send {
    /// fills `buf` completely with the bytes starting at `offset`
    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> anyhow::Result<()>;
}

#[async_trait]
impl SegmentSource for File {
    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> anyhow::Result<()> {
        self.seek(SeekFrom::Start(offset)).await?;
        self.read_exact(buf).await?;
        Ok(())
    }
}

#[async_trait]
impl SegmentSource for Bytes {
    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> anyhow::Result<()> {
        let start = usize::try_from(offset)?;
        let end = start.checked_add(buf.len())
            .filter(|&end| end <= self.len())
            .ok_or_else(|| anyhow!("read of {} bytes at offset {} beyond the end of {} bytes", buf.len(), offset, self.len()))?;
        buf.copy_from_slice(&self[start..end]);
        Ok(())
    }
}

/// opens the source file read-only, returning it with its size
pub async fn open_source(path: &Path) -> anyhow::Result<(File, u64)> {
    let file = File::open(path).await
        .map_err(|e| anyhow!("cannot open source file {:?}: {}", path, e))?;
    let file_size = file.metadata().await?.len();
    Ok((file, file_size))
}


/// Sequential write side for a single destination file
#[async_trait]
pub trait DestinationSink: Send {
    async fn write_segment(&mut self, data: &[u8]) -> anyhow::Result<()>;

    /// flushes everything written so far - the sink is not used afterwards
    async fn finish(&mut self) -> anyhow::Result<()>;
}

#[async_trait]
impl DestinationSink for BufWriter<File> {
    async fn write_segment(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.write_all(data).await?;
        Ok(())
    }

    async fn finish(&mut self) -> anyhow::Result<()> {
        self.flush().await?;
        self.get_ref().sync_all().await?;
        Ok(())
    }
}

#[async_trait]
pub trait SinkFactory: Send + Sync {
    async fn open(&self, destination_name: &str) -> anyhow::Result<Box<dyn DestinationSink>>;
}

/// Creates destination files inside a fixed directory. Only the last path component of the
///  requested name is used, so a sender can not write outside that directory.
pub struct FileSinkFactory {
    output_dir: PathBuf,
}

impl FileSinkFactory {
    pub fn new(output_dir: impl Into<PathBuf>) -> FileSinkFactory {
        FileSinkFactory {
            output_dir: output_dir.into(),
        }
    }

    pub fn resolve(&self, destination_name: &str) -> anyhow::Result<PathBuf> {
        match Path::new(destination_name).file_name() {
            Some(file_name) => Ok(self.output_dir.join(file_name)),
            None => bail!("{:?} is not a valid destination file name", destination_name),
        }
    }
}

#[async_trait]
impl SinkFactory for FileSinkFactory {
    async fn open(&self, destination_name: &str) -> anyhow::Result<Box<dyn DestinationSink>> {
        let path = self.resolve(destination_name)?;
        debug!("creating destination file {:?}", path);

        let file = File::create(&path).await
            .map_err(|e| anyhow!("cannot create destination file {:?}: {}", path, e))?;
        Ok(Box::new(BufWriter::new(file)))
    }
}
