//! Recovery code generation.
//!
//! A recovery code is a second secret over the same envelope mechanism. It
//! is shown once at setup, so it has to survive being written on paper:
//! uppercase letters and digits in four dash-separated blocks.

use rand::{rngs::OsRng, Rng};

use lockbox_common::Secret;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_CHARS: usize = 32;
const GROUP_SIZE: usize = 8;

/// Generate a fresh recovery code, e.g. `7QK2M0XA-...` (32 symbols, ~165 bits).
pub fn generate_recovery_code() -> Secret {
    let mut code = String::with_capacity(CODE_CHARS + CODE_CHARS / GROUP_SIZE);
    let mut rng = OsRng;

    for i in 0..CODE_CHARS {
        if i > 0 && i % GROUP_SIZE == 0 {
            code.push('-');
        }
        code.push(CHARSET[rng.gen_range(0..CHARSET.len())] as char);
    }

    Secret::from(code)
}

/// Canonical form of a user-typed recovery code.
///
/// Surrounding whitespace is dropped and letters are uppercased, so a code
/// transcribed in lowercase still derives the same wrapping key.
pub fn normalize_recovery_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
