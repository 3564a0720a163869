//! Float32 vector packing and exact dot-product search.
//!
//! Embeddings are stored on disk as raw little-endian `f32` bytes with no
//! header (see [`crate::store`]). Because every vector the repository deals
//! with is L2-normalized before it is ever persisted (see
//! [`crate::embedder`]), plain dot product is equivalent to cosine
//! similarity here — there is no norm division to do at query time.

use crate::error::{RagError, Result};

/// Pack a float vector into little-endian bytes, 4 bytes per element.
pub fn pack(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Unpack little-endian bytes into a float vector.
pub fn unpack(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(RagError::InvalidFormat {
            expected: bytes.len() - (bytes.len() % 4),
            got: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Read a single little-endian float at a byte offset without allocating.
pub fn read_float_le(bytes: &[u8], offset: usize) -> Result<f32> {
    let end = offset
        .checked_add(4)
        .filter(|&e| e <= bytes.len())
        .ok_or_else(|| RagError::InvalidFormat {
            expected: offset + 4,
            got: bytes.len(),
        })?;
    let chunk = &bytes[offset..end];
    Ok(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

/// L2-normalize a vector in place, guarding against division by near-zero.
pub fn normalize_l2(v: &mut [f32]) {
    let norm = (v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt()).max(1e-12);
    for x in v.iter_mut() {
        *x = (*x as f64 / norm) as f32;
    }
}

/// Dot product over two unpacked vectors, accumulating in f64 for accuracy.
/// Only the overlapping prefix is used if lengths differ.
pub fn dot(a: &[f32], b: &[f32]) -> f64 {
    let n = a.len().min(b.len());
    let mut sum = 0.0f64;
    let mut i = 0;
    while i + 4 <= n {
        sum += a[i] as f64 * b[i] as f64
            + a[i + 1] as f64 * b[i + 1] as f64
            + a[i + 2] as f64 * b[i + 2] as f64
            + a[i + 3] as f64 * b[i + 3] as f64;
        i += 4;
    }
    while i < n {
        sum += a[i] as f64 * b[i] as f64;
        i += 1;
    }
    sum
}

/// Dot product between an unpacked query vector and a packed little-endian
/// vector embedded at `byte_offset` within a larger buffer (e.g. one slot in
/// `embeddings.bin`). Bounds-checks the read; never allocates.
pub fn dot_packed_le(query: &[f32], packed: &[u8], byte_offset: usize, dim: usize) -> Result<f64> {
    let end = byte_offset
        .checked_add(dim * 4)
        .filter(|&e| e <= packed.len())
        .ok_or_else(|| RagError::InvalidFormat {
            expected: byte_offset + dim * 4,
            got: packed.len(),
        })?;
    let slice = &packed[byte_offset..end];
    let n = query.len().min(dim);
    let mut sum = 0.0f64;
    for i in 0..n {
        let v = read_float_le(slice, i * 4)?;
        sum += query[i] as f64 * v as f64;
    }
    Ok(sum)
}
