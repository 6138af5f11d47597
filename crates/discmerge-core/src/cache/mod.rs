//! Melody cache (`melodies_{bank}.chc`) codec.
//!
//! Layout, all integers little-endian `u32`:
//!
//! ```text
//! count
//! count x (song_id, offset, compressed_size, uncompressed_size)
//! zlib(melody_{target}.xml) for each song, ascending by song_id
//! ```
//!
//! Offsets are absolute from the start of the file.

use std::collections::BTreeSet;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tracing::debug;

use crate::error::{Error, Result};

/// Size of one index record
pub const RECORD_SIZE: usize = 16;

/// Upper bound on the buffer reserved from a declared entry size
const MAX_PREALLOC: usize = 1 << 20;

/// One index record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub song_id: u32,
    pub offset: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

/// Header size for `count` entries
pub fn header_size(count: usize) -> usize {
    4 + count * RECORD_SIZE
}

/// Build a cache from `(song_id, document bytes)` pairs.
///
/// Entries are written in ascending song ID order regardless of input order.
pub fn build_cache(documents: &[(u32, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut sorted: Vec<&(u32, Vec<u8>)> = documents.iter().collect();
    sorted.sort_by_key(|(id, _)| *id);
    if sorted.windows(2).any(|w| w[0].0 == w[1].0) {
        return Err(Error::corrupt("duplicate song id in cache input"));
    }

    let mut blobs = Vec::with_capacity(sorted.len());
    for (song_id, raw) in sorted {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(raw)?;
        let compressed = encoder.finish()?;
        blobs.push((*song_id, compressed, raw.len()));
    }

    let header = header_size(blobs.len());
    let body: usize = blobs.iter().map(|(_, c, _)| c.len()).sum();
    let mut out = Vec::with_capacity(header + body);

    out.extend_from_slice(&to_u32(blobs.len(), "entry count")?.to_le_bytes());
    let mut offset = header;
    for (song_id, compressed, raw_len) in &blobs {
        out.extend_from_slice(&song_id.to_le_bytes());
        out.extend_from_slice(&to_u32(offset, "offset")?.to_le_bytes());
        out.extend_from_slice(&to_u32(compressed.len(), "compressed size")?.to_le_bytes());
        out.extend_from_slice(&to_u32(*raw_len, "uncompressed size")?.to_le_bytes());
        offset += compressed.len();
    }
    for (_, compressed, _) in &blobs {
        out.extend_from_slice(compressed);
    }
    Ok(out)
}

/// Build a cache from `Export/<id>/melody_{version}.xml` for every song.
///
/// `check` runs before each song is read so a caller can stop a long build.
pub fn build_cache_from_export(
    export_root: &Path,
    song_ids: &BTreeSet<u32>,
    version: u32,
    mut check: impl FnMut() -> Result<()>,
) -> Result<Vec<u8>> {
    let mut documents = Vec::with_capacity(song_ids.len());
    for &song_id in song_ids {
        check()?;
        let path = melody_path(export_root, song_id, version);
        if !path.is_file() {
            return Err(Error::missing(format!(
                "melody document for song {} (required for version {}): {}",
                song_id,
                version,
                path.display()
            )));
        }
        documents.push((song_id, fs::read(&path)?));
    }
    let data = build_cache(&documents)?;
    debug!("Built melody cache: {} entries, {} bytes", documents.len(), data.len());
    Ok(data)
}

/// Parse and bounds-check the index
pub fn parse_index(data: &[u8]) -> Result<Vec<CacheEntry>> {
    if data.len() < 4 {
        return Err(Error::corrupt("melody cache too small"));
    }
    let count = read_u32(data, 0) as usize;
    let header = count
        .checked_mul(RECORD_SIZE)
        .and_then(|n| n.checked_add(4))
        .ok_or_else(|| Error::corrupt("melody cache entry count overflows"))?;
    if data.len() < header {
        return Err(Error::corrupt(format!(
            "melody cache truncated header: {} entries need {} bytes, have {}",
            count,
            header,
            data.len()
        )));
    }

    let mut entries = Vec::with_capacity(count);
    let mut seen = BTreeSet::new();
    for i in 0..count {
        let pos = 4 + i * RECORD_SIZE;
        let entry = CacheEntry {
            song_id: read_u32(data, pos),
            offset: read_u32(data, pos + 4),
            compressed_size: read_u32(data, pos + 8),
            uncompressed_size: read_u32(data, pos + 12),
        };
        if !seen.insert(entry.song_id) {
            return Err(Error::corrupt(format!(
                "melody cache has duplicate entry for song {}",
                entry.song_id
            )));
        }
        if (entry.offset as usize) < header
            || entry.compressed_size == 0
            || entry.uncompressed_size == 0
        {
            return Err(Error::corrupt(format!(
                "melody cache invalid entry for song {}: offset={} compressed={} uncompressed={}",
                entry.song_id, entry.offset, entry.compressed_size, entry.uncompressed_size
            )));
        }
        let end = u64::from(entry.offset) + u64::from(entry.compressed_size);
        if end > data.len() as u64 {
            return Err(Error::corrupt(format!(
                "melody cache entry for song {} out of bounds: end={} len={}",
                entry.song_id,
                end,
                data.len()
            )));
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Inflate one entry and check its declared size
pub fn read_entry(data: &[u8], entry: &CacheEntry) -> Result<Vec<u8>> {
    let start = entry.offset as usize;
    let end = start + entry.compressed_size as usize;
    let compressed = data
        .get(start..end)
        .ok_or_else(|| Error::corrupt(format!("entry for song {} out of bounds", entry.song_id)))?;

    let declared = u64::from(entry.uncompressed_size);
    let mut raw = Vec::with_capacity((entry.uncompressed_size as usize).min(MAX_PREALLOC));
    // One byte past the declared size is enough to detect a mismatch
    ZlibDecoder::new(compressed)
        .take(declared + 1)
        .read_to_end(&mut raw)
        .map_err(|e| {
            Error::corrupt(format!(
                "melody cache decompress failed for song {}: {}",
                entry.song_id, e
            ))
        })?;
    if raw.len() != entry.uncompressed_size as usize {
        return Err(Error::corrupt(format!(
            "melody cache size mismatch for song {}: got={} expected={}",
            entry.song_id,
            raw.len(),
            entry.uncompressed_size
        )));
    }
    Ok(raw)
}

/// Validate a built cache against the expected song set and its sources.
///
/// Every entry is inflated; the first `sample` entries are also compared
/// byte-for-byte with `Export/<id>/melody_{version}.xml`.
pub fn validate_cache(
    data: &[u8],
    expected: &BTreeSet<u32>,
    export_root: &Path,
    version: u32,
    sample: usize,
) -> Result<()> {
    let entries = parse_index(data)?;

    let actual: BTreeSet<u32> = entries.iter().map(|e| e.song_id).collect();
    if &actual != expected {
        let missing: Vec<u32> = expected.difference(&actual).take(20).copied().collect();
        let extra: Vec<u32> = actual.difference(expected).take(20).copied().collect();
        return Err(Error::corrupt(format!(
            "melody cache song-id set mismatch: missing={:?} extra={:?}",
            missing, extra
        )));
    }

    for (index, entry) in entries.iter().enumerate() {
        let raw = read_entry(data, entry)?;
        if index >= sample {
            continue;
        }
        let source = melody_path(export_root, entry.song_id, version);
        if !source.is_file() {
            return Err(Error::missing(format!(
                "source melody for cache validation (song {}): {}",
                entry.song_id,
                source.display()
            )));
        }
        if raw != fs::read(&source)? {
            return Err(Error::corrupt(format!(
                "melody cache content mismatch for song {} vs melody_{}.xml",
                entry.song_id, version
            )));
        }
    }
    Ok(())
}

pub fn melody_path(export_root: &Path, song_id: u32, version: u32) -> std::path::PathBuf {
    export_root
        .join(song_id.to_string())
        .join(format!("melody_{}.xml", version))
}

fn read_u32(data: &[u8], pos: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[pos..pos + 4]);
    u32::from_le_bytes(bytes)
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::corrupt(format!("melody cache {} exceeds u32", what)))
}
