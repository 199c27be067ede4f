//! Anti-forgery tokens
//!
//! A token binds an action name and a user to a time window:
//! `hex(sha256(secret | tick | action | user))[..20]` with
//! `tick = now / (lifetime / 2)`. Tokens from the current and the previous
//! tick are accepted, so a token lives between half and the full lifetime.

use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::config::AdminConfig;
use crate::utils::current_timestamp;

/// Hex characters kept from the digest
pub const NONCE_LEN: usize = 20;

/// Issues and verifies anti-forgery tokens
pub struct NonceManager {
    secret: Vec<u8>,
    lifetime_secs: u64,
}

impl NonceManager {
    pub fn new(secret: Vec<u8>, lifetime_secs: u64) -> Self {
        Self {
            secret,
            lifetime_secs: lifetime_secs.max(2),
        }
    }

    /// Secret from config, or a random one for this process
    pub fn from_config(config: &AdminConfig) -> Self {
        let secret = match config.nonce_secret {
            Some(ref secret) => secret.as_bytes().to_vec(),
            None => {
                let mut secret = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut secret);
                secret
            }
        };
        Self::new(secret, config.nonce_lifetime_secs)
    }

    fn tick(&self, now: u64) -> u64 {
        now / (self.lifetime_secs / 2)
    }

    fn token_for_tick(&self, tick: u64, action: &str, user: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(b"|");
        hasher.update(tick.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(action.as_bytes());
        hasher.update(b"|");
        hasher.update(user.as_bytes());
        let mut token = hex::encode(hasher.finalize());
        token.truncate(NONCE_LEN);
        token
    }

    /// Token for `action` issued to `user` now
    pub fn create(&self, action: &str, user: &str) -> String {
        self.create_at(action, user, current_timestamp())
    }

    pub fn create_at(&self, action: &str, user: &str, now: u64) -> String {
        self.token_for_tick(self.tick(now), action, user)
    }

    /// Check a token presented by `user` for `action`
    pub fn verify(&self, nonce: &str, action: &str, user: &str) -> bool {
        self.verify_at(nonce, action, user, current_timestamp())
    }

    pub fn verify_at(&self, nonce: &str, action: &str, user: &str, now: u64) -> bool {
        let tick = self.tick(now);
        // Evaluate both windows so timing does not reveal which one matched
        let current = constant_time_eq(
            nonce.as_bytes(),
            self.token_for_tick(tick, action, user).as_bytes(),
        );
        let previous = tick > 0
            && constant_time_eq(
                nonce.as_bytes(),
                self.token_for_tick(tick - 1, action, user).as_bytes(),
            );
        current | previous
    }
}

/// Compare two byte strings without early exit
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
