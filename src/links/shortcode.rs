use rand::Rng;

pub const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

const DEFAULT_MAX_ATTEMPTS: usize = 100;

/// Random short codes over a 62-character alphabet, retried on collision
#[derive(Debug, Clone)]
pub struct ShortCodeGenerator {
    length: usize,
    max_attempts: usize,
}

impl Default for ShortCodeGenerator {
    fn default() -> Self {
        Self::new(6)
    }
}

impl ShortCodeGenerator {
    pub fn new(length: usize) -> Self {
        Self {
            length: length.max(1),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn length(&self) -> usize {
        self.length
    }

    fn candidate(&self) -> String {
        let mut rng = rand::rng();
        (0..self.length)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect()
    }

    /// A code for which `exists` is false, or `None` once attempts run out
    pub fn generate(&self, exists: impl Fn(&str) -> bool) -> Option<String> {
        for attempt in 0..self.max_attempts {
            let code = self.candidate();
            if !exists(&code) {
                return Some(code);
            }
            tracing::debug!(attempt, "short code collision, retrying");
        }
        tracing::warn!(attempts = self.max_attempts, "short code space exhausted");
        None
    }
}

/// Custom aliases: 3 to 32 characters of letters, digits, `-` or `_`
pub fn is_valid_alias(alias: &str) -> bool {
    (3..=32).contains(&alias.len())
        && alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
