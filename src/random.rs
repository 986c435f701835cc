use rand::{rngs::OsRng, RngCore};

///
/// Source of the random bytes lock tokens are made of.
///
/// Tokens must be unforgeable: production code should use a cryptographically secure source.
///
pub trait RandomSource: Send + Sync {
    fn fill_bytes(&self, dest: &mut [u8]);
}

///
/// [`RandomSource`] reading from the operating system CSPRNG.
///
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }
}

pub(crate) const TOKEN_LEN: usize = 20;

///
/// Draw a fresh token and render it as lowercase hex.
///
pub(crate) fn new_token(source: &dyn RandomSource) -> String {
    let mut bytes = [0u8; TOKEN_LEN];
    source.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
