//! Room code generation.
//!
//! Codes are short enough to read over a call and typed by hand, so the
//! alphabet excludes glyphs that are easy to confuse (`0`/`O`, `1`/`I`/`L`).

use rand::Rng;

/// Alphabet for room codes. Visually confusable characters are excluded.
pub const CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";

/// Length of a room code.
pub const CODE_LENGTH: usize = 6;

/// Generate one candidate room code.
///
/// Uniqueness against live rooms is the caller's responsibility; see
/// [`generate_unique`].
#[must_use]
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..CODE_ALPHABET.len());
            char::from(*CODE_ALPHABET.get(idx).unwrap_or(&b'X'))
        })
        .collect()
}

/// Generate a room code that does not collide with any live room.
///
/// The code space (31^6 ≈ 887M) is far larger than any realistic live-room
/// count, so the regeneration loop terminates quickly in practice.
pub fn generate_unique<F>(mut is_taken: F) -> String
where
    F: FnMut(&str) -> bool,
{
    loop {
        let code = generate();
        if !is_taken(&code) {
            return code;
        }
    }
}
