use rand::Rng;
use sha2::{Digest, Sha256};

const ALPHABET: base32::Alphabet = base32::Alphabet::RFC4648 { padding: false };

/// Random bytes per key: 160 bits.
const RANDOM_BYTES: usize = 20;
/// Base32 length of the random part.
const BODY_LEN: usize = 32;
/// Base32 length of the 4-byte checksum.
const CHECKSUM_LEN: usize = 7;

/// Mints and sanity-checks key codes of the form `<prefix><body><checksum>`.
#[derive(Debug, Clone)]
pub struct KeyCodeGenerator {
    prefix: String,
}

impl KeyCodeGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn generate(&self) -> String {
        let mut random_bytes = [0u8; RANDOM_BYTES];
        rand::thread_rng().fill(&mut random_bytes);

        let checksum = checksum(&self.prefix, &random_bytes);
        format!(
            "{}{}{}",
            self.prefix,
            encode(&random_bytes),
            encode(&checksum)
        )
    }

    /// Cheap structural check so garbage never reaches the store.
    ///
    /// Only the fixed-length tail is inspected and the checksum is taken over
    /// the prefix actually presented, so codes minted under an earlier prefix
    /// stay well formed after the configured prefix changes.
    pub fn is_well_formed(&self, key_code: &str) -> bool {
        let tail_len = BODY_LEN + CHECKSUM_LEN;
        if key_code.len() <= tail_len || !key_code.is_char_boundary(key_code.len() - tail_len) {
            return false;
        }

        let (prefix, rest) = key_code.split_at(key_code.len() - tail_len);
        if !rest.is_ascii() {
            return false;
        }

        let (body, checksum_part) = rest.split_at(BODY_LEN);
        let (Some(random_bytes), Some(provided)) = (decode(body), decode(checksum_part)) else {
            return false;
        };

        random_bytes.len() == RANDOM_BYTES && provided[..] == checksum(prefix, &random_bytes)
    }
}

impl Default for KeyCodeGenerator {
    fn default() -> Self {
        Self::new("sk-")
    }
}

/// First four bytes of SHA-256 over the prefix and the random part.
fn checksum(prefix: &str, random_bytes: &[u8]) -> [u8; 4] {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(random_bytes);
    let digest = hasher.finalize();

    let mut checksum = [0u8; 4];
    checksum.copy_from_slice(&digest[..4]);
    checksum
}

fn encode(bytes: &[u8]) -> String {
    base32::encode(ALPHABET, bytes).to_ascii_lowercase()
}

fn decode(text: &str) -> Option<Vec<u8>> {
    if text.bytes().any(|b| b.is_ascii_uppercase()) {
        return None;
    }
    base32::decode(ALPHABET, &text.to_ascii_uppercase())
}

/// Compares secrets without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Shortened form of a key code for log lines.
pub fn redact(key_code: &str) -> String {
    let visible: String = key_code.chars().take(8).collect();
    format!("{visible}…")
}
