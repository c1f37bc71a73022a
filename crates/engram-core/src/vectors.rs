//! Vector Utilities
//!
//! Embedding vectors are fixed at 1536 dimensions and stored as little-endian
//! f32 BLOBs. Cosine similarity is computed in-process; approximate-nearest-
//! neighbor indexing is a deployment concern, not a correctness requirement.

/// Dimensionality of every embedding in the system.
pub const EMBEDDING_DIMENSIONS: usize = 1536;

/// Cosine similarity between two vectors.
///
/// Returns 0.0 on dimension mismatch or zero-norm input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 { dot / denominator } else { 0.0 }
}

/// Serialize a vector to a little-endian f32 BLOB for storage.
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Deserialize a BLOB back to a vector. Returns `None` when the byte length
/// is not a multiple of 4.
pub fn blob_to_vector(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}
