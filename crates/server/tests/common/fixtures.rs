//! Test fixtures for generating test data.

use bytes::Bytes;
use serde_json::{Value, json};

/// Bearer token resolving to subject `alice`.
pub const ALICE_TOKEN: &str = "test-user-token";
/// Bearer token resolving to subject `bob`.
#[allow(dead_code)]
pub const BOB_TOKEN: &str = "test-other-token";
/// Bearer token resolving to the elevated subject `admin`.
#[allow(dead_code)]
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Generate deterministic test data based on a seed.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Reservation body for a PNG of `size` bytes.
#[allow(dead_code)]
pub fn png_reservation(size: usize, parent: Option<&str>) -> Value {
    let mut body = json!({
        "filename": "screenshot.png",
        "content_type": "image/png",
        "size_bytes": size,
    });
    if let Some(parent) = parent {
        body["parent_entity_id"] = json!(parent);
    }
    body
}
