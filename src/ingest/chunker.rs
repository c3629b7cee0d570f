use sha2::{Digest, Sha256};

/// Blocks are laid end to end with this separator when computing character spans.
const BLOCK_SEPARATOR: &str = "\n\n";

/// A chunk of text with its position in the joined block sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedChunk {
    pub index: usize,
    pub text: String,
    /// Character (not byte) offsets, end exclusive
    pub char_start: usize,
    pub char_end: usize,
}

/// Pack ordered text blocks into chunks of at most `max_chars` characters.
///
/// Blocks are trimmed and whitespace-only blocks are skipped. A block that would
/// overflow the open chunk closes it; the next chunk starts with the last
/// `overlap_chars` characters of the closed one. Blocks longer than `max_chars`
/// are split, each piece overlapping the previous by `overlap_chars`.
///
/// Offsets count characters so multi-byte text never splits inside a code point.
/// Requires `overlap_chars < max_chars` (enforced by config validation).
pub fn pack_blocks<S: AsRef<str>>(blocks: &[S], max_chars: usize, overlap_chars: usize) -> Vec<PackedChunk> {
    let mut packer = Packer::new(max_chars, overlap_chars.min(max_chars.saturating_sub(1)));
    let separator_len = BLOCK_SEPARATOR.chars().count();
    let mut offset = 0;
    let mut first = true;

    for block in blocks {
        let block = block.as_ref().trim();
        if block.is_empty() {
            continue;
        }
        if !first {
            offset += separator_len;
        }
        first = false;

        let block: Vec<char> = block.chars().collect();
        let len = block.len();
        packer.push(block, offset);
        offset += len;
    }

    packer.finish()
}

struct Packer {
    max: usize,
    overlap: usize,
    current: Vec<char>,
    start: usize,
    /// Whether `current` holds content not yet emitted in any chunk
    fresh: bool,
    chunks: Vec<PackedChunk>,
}

impl Packer {
    fn new(max: usize, overlap: usize) -> Self {
        Self {
            max: max.max(1),
            overlap,
            current: Vec::new(),
            start: 0,
            fresh: false,
            chunks: Vec::new(),
        }
    }

    fn push(&mut self, block: Vec<char>, offset: usize) {
        let separator_len = BLOCK_SEPARATOR.chars().count();
        if self.fresh && self.current.len() + separator_len + block.len() > self.max {
            self.close();
        }

        if self.current.is_empty() {
            self.start = offset;
        } else {
            self.current.extend(BLOCK_SEPARATOR.chars());
        }
        self.current.extend(block);
        self.fresh = true;

        let step = self.max - self.overlap;
        while self.current.len() > self.max {
            let text: String = self.current[..self.max].iter().collect();
            self.emit(text, self.start, self.start + self.max);
            self.current.drain(..step);
            self.start += step;
        }
    }

    /// Emit the open chunk and keep its tail as overlap for the next one.
    fn close(&mut self) {
        let len = self.current.len();
        let text: String = self.current.iter().collect();
        self.emit(text, self.start, self.start + len);

        let keep = self.overlap.min(len);
        self.current.drain(..len - keep);
        self.start += len - keep;
        self.fresh = false;
    }

    fn emit(&mut self, text: String, char_start: usize, char_end: usize) {
        self.chunks.push(PackedChunk {
            index: self.chunks.len(),
            text,
            char_start,
            char_end,
        });
    }

    fn finish(mut self) -> Vec<PackedChunk> {
        if self.fresh && !self.current.is_empty() {
            self.close();
        }
        self.chunks
    }
}

/// Fingerprint of a chunk: SHA-256 over the owning source id, file fingerprint,
/// sequence index and text.
///
/// The source id keeps byte-identical copies of a file from sharing chunk rows.
pub fn chunk_fingerprint(source_id: &str, source_fingerprint: &str, index: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(source_fingerprint.as_bytes());
    hasher.update(b":");
    hasher.update(index.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
