use crate::index::{ChunkRecord, FileRecord, MetadataIndex};
use crate::object_store::ChatAttachmentStore;
use crate::url_refresh::{self, RANGE_STREAM_EXPIRY_MARGIN_SECS};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: u64,
    /// Inclusive end, already clamped to `total_size - 1` by `parse`.
    pub end: u64,
}

impl RangeSpec {
    /// Parses a `Range: bytes=start-end` header value. Only the single-range
    /// form is supported (spec.md §4.F); suffix ranges (`bytes=-500`) and
    /// open-ended ranges (`bytes=500-`) are both handled.
    pub fn parse(value: &str, total_size: u64) -> Result<Self> {
        let spec = value
            .strip_prefix("bytes=")
            .ok_or_else(|| Error::validation("Range header must use the bytes unit"))?;
        if spec.contains(',') {
            return Err(Error::validation(
                "multi-range requests are not supported",
            ));
        }

        let (start_str, end_str) = spec
            .split_once('-')
            .ok_or_else(|| Error::validation("malformed Range header"))?;

        let (start, end) = if start_str.is_empty() {
            // Suffix range: last N bytes.
            let suffix_len: u64 = end_str
                .parse()
                .map_err(|_| Error::validation("malformed suffix Range header"))?;
            if suffix_len == 0 || total_size == 0 {
                return Err(Error::RangeNotSatisfiable);
            }
            let start = total_size.saturating_sub(suffix_len);
            (start, total_size - 1)
        } else {
            let start: u64 = start_str
                .parse()
                .map_err(|_| Error::validation("malformed Range start"))?;
            let end = if end_str.is_empty() {
                total_size.saturating_sub(1)
            } else {
                end_str
                    .parse()
                    .map_err(|_| Error::validation("malformed Range end"))?
            };
            (start, end)
        };

        if start >= total_size || start > end {
            return Err(Error::RangeNotSatisfiable);
        }

        Ok(Self {
            start,
            end: end.min(total_size.saturating_sub(1)),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RangeTarget {
    pub chunk: ChunkRecord,
    pub local_start: u64,
    pub request_size: u64,
    /// Inclusive global byte offset of the last byte actually served. May be
    /// less than the requested end when the range crosses a chunk boundary,
    /// since only one chunk is proxied per request.
    pub global_end: u64,
    pub total_size: u64,
}

/// Walks the chunk list's cumulative offsets to find which single chunk holds
/// `range.start`, then clips the response to that chunk's boundary (spec.md
/// §4.F: "HTTP Range → single target chunk via cumulative offset walk").
pub fn locate_range(chunks: &[ChunkRecord], range: RangeSpec, total_size: u64) -> Result<RangeTarget> {
    let mut offset = 0u64;
    for chunk in chunks {
        let chunk_size = chunk.size as u64;
        let chunk_end = offset + chunk_size - 1;

        if range.start <= chunk_end {
            let local_start = range.start - offset;
            let global_end = range.end.min(chunk_end);
            let request_size = global_end - range.start + 1;

            return Ok(RangeTarget {
                chunk: chunk.clone(),
                local_start,
                request_size,
                global_end,
                total_size,
            });
        }

        offset += chunk_size;
    }

    Err(Error::RangeNotSatisfiable)
}

/// Resolves a `Range` header against a file's metadata and chunk list, JIT
/// refreshing the target chunk's url with the stream engine's stricter expiry
/// margin before the caller proxies bytes from it.
pub async fn resolve_range(
    index: &MetadataIndex,
    store: &dyn ChatAttachmentStore,
    secondary_channel_id: Option<&str>,
    file: &FileRecord,
    chunks: &[ChunkRecord],
    range_header: &str,
    now: i64,
) -> Result<RangeTarget> {
    let total_size = file.size as u64;
    let range = RangeSpec::parse(range_header, total_size)?;
    let target = locate_range(chunks, range, total_size)?;

    let refreshed_chunk = url_refresh::refresh_chunk_url_jit(
        index,
        store,
        secondary_channel_id,
        target.chunk,
        now,
        RANGE_STREAM_EXPIRY_MARGIN_SECS,
    )
    .await?;

    Ok(RangeTarget {
        chunk: refreshed_chunk,
        ..target
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(idx: i64, size: i64) -> ChunkRecord {
        ChunkRecord {
            file_id: "f1".into(),
            idx,
            message_id: format!("m{idx}"),
            channel_id: "c".into(),
            size,
            url: format!("https://cdn.example/{idx}"),
        }
    }

    #[test]
    fn parses_simple_range() {
        let r = RangeSpec::parse("bytes=10-20", 100).unwrap();
        assert_eq!(r, RangeSpec { start: 10, end: 20 });
    }

    #[test]
    fn parses_open_ended_range() {
        let r = RangeSpec::parse("bytes=90-", 100).unwrap();
        assert_eq!(r, RangeSpec { start: 90, end: 99 });
    }

    #[test]
    fn parses_suffix_range() {
        let r = RangeSpec::parse("bytes=-10", 100).unwrap();
        assert_eq!(r, RangeSpec { start: 90, end: 99 });
    }

    #[test]
    fn start_past_total_is_unsatisfiable() {
        let err = RangeSpec::parse("bytes=200-300", 100).unwrap_err();
        assert!(matches!(err, Error::RangeNotSatisfiable));
    }

    #[test]
    fn locate_range_finds_middle_chunk() {
        let chunks = vec![chunk(0, 10), chunk(1, 10), chunk(2, 10)];
        let range = RangeSpec { start: 15, end: 25 };
        let target = locate_range(&chunks, range, 30).unwrap();
        assert_eq!(target.chunk.idx, 1);
        assert_eq!(target.local_start, 5);
        // Clipped to chunk 1's boundary (offset 10..=19), not the full request.
        assert_eq!(target.global_end, 19);
        assert_eq!(target.request_size, 5);
    }

    #[test]
    fn locate_range_single_chunk_request_fits_fully() {
        let chunks = vec![chunk(0, 10), chunk(1, 10)];
        let range = RangeSpec { start: 2, end: 5 };
        let target = locate_range(&chunks, range, 20).unwrap();
        assert_eq!(target.chunk.idx, 0);
        assert_eq!(target.request_size, 4);
        assert_eq!(target.global_end, 5);
    }

    #[test]
    fn locate_range_beyond_all_chunks_is_unsatisfiable() {
        let chunks = vec![chunk(0, 10)];
        let range = RangeSpec { start: 50, end: 60 };
        assert!(matches!(
            locate_range(&chunks, range, 10).unwrap_err(),
            Error::RangeNotSatisfiable
        ));
    }
}
