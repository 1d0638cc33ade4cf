use anyhow::bail;
use bytes::Bytes;
use tokio::time::Instant;
use crate::storage::SegmentSource;

/// One contiguous chunk of the source file
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Segment {
    pub index: u32,
    pub byte_offset: u64,
    pub byte_length: usize,
    /// `None` until the first transmission
    pub last_send_time: Option<Instant>,
    pub acknowledged: bool,
}

/// Per-segment bookkeeping for a single transfer, derived once from the file size. Payload is
///  not cached: every (re)transmission reads the segment from the source again.
pub struct SegmentTable {
    file_size: u64,
    segments: Vec<Segment>,
}

impl SegmentTable {
    pub fn new(file_size: u64, max_payload: usize) -> anyhow::Result<SegmentTable> {
        if max_payload == 0 {
            bail!("max payload must not be 0");
        }

        let num_segments = file_size.div_ceil(max_payload as u64);
        if num_segments > u32::MAX as u64 {
            bail!("a file of {} bytes needs {} segments, the protocol supports at most {}", file_size, num_segments, u32::MAX);
        }

        let mut segments = Vec::new();
        segments.try_reserve_exact(num_segments as usize)?;

        for index in 0..num_segments {
            let byte_offset = index * max_payload as u64;
            let byte_length = (file_size - byte_offset).min(max_payload as u64) as usize;
            segments.push(Segment {
                index: index as u32,
                byte_offset,
                byte_length,
                last_send_time: None,
                acknowledged: false,
            });
        }

        Ok(SegmentTable {
            file_size,
            segments,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn total_segments(&self) -> u32 {
        self.segments.len() as u32
    }

    pub fn get(&self, index: u32) -> Option<&Segment> {
        self.segments.get(index as usize)
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut Segment> {
        self.segments.get_mut(index as usize)
    }

    pub fn is_acknowledged(&self, index: u32) -> bool {
        self.get(index)
            .map(|s| s.acknowledged)
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Segment> {
        self.segments.iter_mut()
    }

    /// reads a segment's payload from the source
    pub async fn read_payload(&self, index: u32, source: &mut dyn SegmentSource) -> anyhow::Result<Bytes> {
        let segment = match self.get(index) {
            Some(segment) => segment,
            None => bail!("segment #{} does not exist, there are {}", index, self.total_segments()),
        };

        let mut buf = vec![0u8; segment.byte_length];
        source.read_at(segment.byte_offset, &mut buf).await?;
        Ok(Bytes::from(buf))
    }
}
