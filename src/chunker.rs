//! Splits a byte stream into payload-sized chunks without cutting words.
//!
//! A cut is only placed after a non-alphabetic byte, so every alphabetic
//! word stays whole. Reduce-phase input is additionally never cut in front
//! of a digit, which keeps each word attached to the run of `1`s after it.

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{MrError, Result};

/// Raw file text (Map phase) or `word111` pairs (Reduce phase).
pub type Chunk = Vec<u8>;

pub fn is_alpha(byte: u8) -> bool {
    byte.is_ascii_alphabetic()
}

/// What a source holds, which decides where it may be cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Raw input text for the Map phase. Digits are not words and may be
    /// split anywhere.
    Text,
    /// Concatenated Map output (`cat11the1`) for the Reduce phase.
    Pairs,
}

impl ChunkKind {
    fn allows_cut(self, before: u8, after: u8) -> bool {
        match self {
            ChunkKind::Text => !is_alpha(before),
            ChunkKind::Pairs => !is_alpha(before) && !after.is_ascii_digit(),
        }
    }
}

/// Chunk `len` bytes of `source`, starting from its current position.
///
/// No chunk is longer than `capacity`. An empty source yields one empty
/// chunk. A window holding no valid cut is skipped and logged; its bytes
/// are lost.
pub fn chunk_reader<R>(
    source: &mut R,
    len: u64,
    capacity: usize,
    kind: ChunkKind,
) -> Result<Vec<Chunk>>
where
    R: Read + Seek,
{
    if capacity == 0 {
        return Err(MrError::Config("chunk capacity must be positive".into()));
    }
    if len == 0 {
        return Ok(vec![Chunk::new()]);
    }

    let start = source.stream_position()?;
    let mut chunks = Vec::new();
    let mut offset: u64 = 0;
    // One byte of lookahead past the window to validate a cut at its end.
    let mut window = vec![0u8; capacity + 1];

    while offset < len {
        let remaining = len - offset;
        source.seek(SeekFrom::Start(start + offset))?;

        if remaining <= capacity as u64 {
            let mut chunk = vec![0u8; remaining as usize];
            source.read_exact(&mut chunk)?;
            chunks.push(chunk);
            break;
        }

        source.read_exact(&mut window)?;
        let cut = (1..=capacity)
            .rev()
            .find(|&cut| kind.allows_cut(window[cut - 1], window[cut]));
        match cut {
            Some(cut) => {
                chunks.push(window[..cut].to_vec());
                offset += cut as u64;
            }
            None => {
                warn!(
                    offset = start + offset,
                    capacity,
                    ?kind,
                    "no word boundary inside chunk window, skipping it"
                );
                offset += capacity as u64;
            }
        }
    }

    debug!(chunks = chunks.len(), bytes = len, "chunked input");
    Ok(chunks)
}

pub fn chunk_bytes(source: &[u8], capacity: usize, kind: ChunkKind) -> Result<Vec<Chunk>> {
    let mut cursor = Cursor::new(source);
    chunk_reader(&mut cursor, source.len() as u64, capacity, kind)
}

/// Chunk an input text file for the Map phase.
pub fn chunk_file(path: &Path, capacity: usize) -> Result<Vec<Chunk>> {
    let open_err = |source| MrError::InputOpen {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(open_err)?;
    let len = file.metadata().map_err(open_err)?.len();
    chunk_reader(&mut file, len, capacity, ChunkKind::Text)
}
