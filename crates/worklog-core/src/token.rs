//! Process identity tokens.

use rand::Rng;
use rand::distr::Alphanumeric;

/// Returns a random token of `length` characters drawn uniformly from the
/// 62-character alphanumeric alphabet.
///
/// Not cryptographically secure. Generated once per process start and used
/// to namespace log identifiers across concurrently running processes;
/// collision risk at that rate is negligible.
#[must_use]
pub fn random_token(length: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
