//! On-disk encoding of embedding vectors (little-endian f32 BLOBs).

/// Convert an embedding to its BLOB representation.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode a BLOB back into a vector.
///
/// Returns `None` when the byte length is not a multiple of 4 or when the decoded
/// length differs from `dimensions`; callers treat both as storage corruption.
pub fn decode_embedding(blob: &[u8], dimensions: usize) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 || blob.len() / 4 != dimensions {
        return None;
    }
    let floats: Vec<f32> = blob
        .chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect();
    if floats.iter().any(|f| !f.is_finite()) {
        return None;
    }
    Some(floats)
}

/// Current time as RFC 3339, the format used for every timestamp column.
pub fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
