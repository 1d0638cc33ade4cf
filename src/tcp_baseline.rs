//! Plain TCP file copy, as a throughput baseline for the UDP protocol. TCP takes care of
//!  ordering and loss, so this is just a header followed by the file's bytes:
//!
//! ```ascii
//! 0: name length (u16)
//! 2: file size (u64)
//! 10: name (UTF-8)
//! .. file content
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{debug, info};
use crate::storage::FileSinkFactory;

pub const MAX_NAME_LEN: usize = 1024;
const CHUNK_SIZE: usize = 64 * 1024;
const HEADER_LEN: usize = 2 + 8;
const PROGRESS_SAMPLE_BYTES: u64 = 10_000_000;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TcpTransferStats {
    pub destination_name: String,
    pub bytes: u64,
    pub elapsed: Duration,
}

impl TcpTransferStats {
    /// megabits per second
    pub fn rate_mbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 * 8.0 / secs / 1_000_000.0
        }
        else {
            0.0
        }
    }
}

fn ser_header(destination_name: &str, file_size: u64, buf: &mut BytesMut) -> anyhow::Result<()> {
    if destination_name.is_empty() || destination_name.len() > MAX_NAME_LEN {
        bail!("destination name must have between 1 and {} bytes, has {}", MAX_NAME_LEN, destination_name.len());
    }
    buf.put_u16(destination_name.len() as u16);
    buf.put_u64(file_size);
    buf.put_slice(destination_name.as_bytes());
    Ok(())
}

pub async fn send_file(to: SocketAddr, source_path: &Path, destination_name: &str) -> anyhow::Result<TcpTransferStats> {
    let mut file = File::open(source_path).await
        .map_err(|e| anyhow!("cannot open source file {:?}: {}", source_path, e))?;
    let file_size = file.metadata().await?.len();

    let mut header = BytesMut::with_capacity(HEADER_LEN + destination_name.len());
    ser_header(destination_name, file_size, &mut header)?;

    let started_at = Instant::now();
    let mut stream = TcpStream::connect(to).await?;
    info!("connected to {:?}, sending {:?} ({} bytes)", to, source_path, file_size);
    stream.write_all(&header).await?;

    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut bytes_sent = 0u64;
    while bytes_sent < file_size {
        let n = file.read(&mut chunk).await?;
        if n == 0 {
            bail!("{:?} ended after {} of {} bytes", source_path, bytes_sent, file_size);
        }
        stream.write_all(&chunk[..n]).await?;
        bytes_sent += n as u64;
    }
    stream.flush().await?;
    stream.shutdown().await?;

    let stats = TcpTransferStats {
        destination_name: destination_name.to_string(),
        bytes: bytes_sent,
        elapsed: started_at.elapsed(),
    };
    info!("sent {} bytes in {:.3}s, {:.2} Mb/s", stats.bytes, stats.elapsed.as_secs_f64(), stats.rate_mbps());
    Ok(stats)
}

/// Accepts a single connection and stores the file it carries in `output_dir`. Only the last
///  component of the transmitted name is used.
pub async fn receive_file(listener: &TcpListener, output_dir: &Path) -> anyhow::Result<TcpTransferStats> {
    let (mut stream, from) = listener.accept().await?;
    info!("accepted connection from {:?}", from);

    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await?;
    let mut header = &header[..];
    let name_len = header.get_u16() as usize;
    let file_size = header.get_u64();

    if name_len == 0 || name_len > MAX_NAME_LEN {
        bail!("invalid name length {} from {:?}", name_len, from);
    }
    let mut name = vec![0u8; name_len];
    stream.read_exact(&mut name).await?;
    let destination_name = String::from_utf8_lossy(&name).into_owned();

    let path = FileSinkFactory::new(output_dir).resolve(&destination_name)?;
    debug!("writing {} bytes from {:?} to {:?}", file_size, from, path);
    let mut out = BufWriter::new(File::create(&path).await
        .map_err(|e| anyhow!("cannot create destination file {:?}: {}", path, e))?);

    let started_at = Instant::now();
    let mut sample_start = started_at;
    let mut next_sample = PROGRESS_SAMPLE_BYTES;

    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut bytes_received = 0u64;
    while bytes_received < file_size {
        let max_len = (file_size - bytes_received).min(CHUNK_SIZE as u64) as usize;
        let n = stream.read(&mut chunk[..max_len]).await?;
        if n == 0 {
            bail!("connection from {:?} closed after {} of {} bytes", from, bytes_received, file_size);
        }
        out.write_all(&chunk[..n]).await?;
        bytes_received += n as u64;

        if bytes_received >= next_sample {
            let now = Instant::now();
            let secs = now.saturating_duration_since(sample_start).as_secs_f64();
            if secs > 0.0 {
                info!("received {} MB - {:.2} Mb/s", bytes_received / 1_000_000, PROGRESS_SAMPLE_BYTES as f64 * 8.0 / secs / 1_000_000.0);
            }
            sample_start = now;
            next_sample += PROGRESS_SAMPLE_BYTES;
        }
    }
    out.flush().await?;

    let stats = TcpTransferStats {
        destination_name,
        bytes: bytes_received,
        elapsed: started_at.elapsed(),
    };
    info!("received {:?}: {} bytes in {:.3}s, {:.2} Mb/s", stats.destination_name, stats.bytes, stats.elapsed.as_secs_f64(), stats.rate_mbps());
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::simple("a.bin", 5, Some(vec![0,5, 0,0,0,0,0,0,0,5, b'a',b'.',b'b',b'i',b'n']))]
    #[case::empty_name("", 5, None)]
    #[case::max_name(&"n".repeat(1024), 0, Some([vec![4,0, 0,0,0,0,0,0,0,0], vec![b'n'; 1024]].concat()))]
    #[case::too_long(&"n".repeat(1025), 0, None)]
    fn test_ser_header(#[case] name: &str, #[case] file_size: u64, #[case] expected: Option<Vec<u8>>) {
        let mut buf = BytesMut::new();
        let actual = ser_header(name, file_size, &mut buf).ok().map(|_| buf.to_vec());
        assert_eq!(actual, expected);
    }

    #[rstest]
    #[case::zero(0, Duration::from_secs(1), 0.0)]
    #[case::one_mbit(125_000, Duration::from_secs(1), 1.0)]
    #[case::no_time(1000, Duration::ZERO, 0.0)]
    fn test_rate(#[case] bytes: u64, #[case] elapsed: Duration, #[case] expected: f64) {
        let stats = TcpTransferStats { destination_name: "x".to_string(), bytes, elapsed };
        assert_eq!(stats.rate_mbps(), expected);
    }
}
