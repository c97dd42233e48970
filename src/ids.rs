//! Identifier minting: short lowercase tokens for sessions and users,
//! uuids for elements.

use rand::Rng;
use uuid::Uuid;

const TOKEN_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Session identifier for freshly minted boards. Sessions are
/// unauthenticated shared spaces, so the token only has to be hard to
/// collide with, not hard to guess.
pub fn session_token() -> String {
    token(7)
}

/// Per-connection user identifier, assigned on socket attach.
pub fn user_token() -> String {
    token(8)
}

/// Element identifier for elements the client did not name itself.
pub fn element_id() -> String {
    Uuid::new_v4().to_string()
}

fn token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| TOKEN_CHARS[rng.gen_range(0..TOKEN_CHARS.len())] as char)
        .collect()
}
