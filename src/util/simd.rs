//! SIMD float kernels built on the `wide` crate.
//!
//! Vector similarity search spends nearly all of its time in these two
//! loops, so they process eight lanes at a time and fall back to scalar
//! code for short inputs and remainders.

use wide::f32x8;

/// Dot product of two equal-length slices.
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    if a.len() < 8 {
        return a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    }

    let mut dot_vec = f32x8::splat(0.0);

    let chunks_a = a.chunks_exact(8);
    let chunks_b = b.chunks_exact(8);
    let remainder_a = chunks_a.remainder();
    let remainder_b = chunks_b.remainder();

    for (chunk_a, chunk_b) in chunks_a.zip(chunks_b) {
        let vec_a = f32x8::new(lanes(chunk_a));
        let vec_b = f32x8::new(lanes(chunk_b));
        dot_vec = dot_vec + vec_a * vec_b;
    }

    let mut total = dot_vec.to_array().iter().sum::<f32>();
    total += remainder_a
        .iter()
        .zip(remainder_b.iter())
        .map(|(x, y)| x * y)
        .sum::<f32>();

    total
}

/// Squared Euclidean distance of two equal-length slices.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    if a.len() < 8 {
        return a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
    }

    let mut acc = f32x8::splat(0.0);

    let chunks_a = a.chunks_exact(8);
    let chunks_b = b.chunks_exact(8);
    let remainder_a = chunks_a.remainder();
    let remainder_b = chunks_b.remainder();

    for (chunk_a, chunk_b) in chunks_a.zip(chunks_b) {
        let diff = f32x8::new(lanes(chunk_a)) - f32x8::new(lanes(chunk_b));
        acc = acc + diff * diff;
    }

    let mut total = acc.to_array().iter().sum::<f32>();
    total += remainder_a
        .iter()
        .zip(remainder_b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>();

    total
}

/// Euclidean norm of a slice.
pub fn norm(a: &[f32]) -> f32 {
    dot_product(a, a).sqrt()
}

fn lanes(chunk: &[f32]) -> [f32; 8] {
    let mut out = [0.0f32; 8];
    out.copy_from_slice(chunk);
    out
}
