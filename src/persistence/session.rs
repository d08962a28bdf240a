use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::game::unix_now;

const SESSION_ID_LENGTH: usize = 16;

/// A login session handed out by the website layer. Sessions expire on
/// read; an expired record is treated as missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: u64,
    pub expiration: u64,
    pub user: String,
}

impl Session {
    pub fn new(user: impl Into<String>, duration_seconds: u64) -> Session {
        let created_at = unix_now();
        Session {
            id: generate_session_id(),
            created_at,
            expiration: created_at + duration_seconds,
            user: user.into(),
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expiration < now
    }
}

fn generate_session_id() -> String {
    let mut id = [0u8; SESSION_ID_LENGTH];
    rand::thread_rng().fill_bytes(&mut id);

    let mut encoded = String::with_capacity(SESSION_ID_LENGTH * 2);
    for byte in id {
        encoded.push_str(&format!("{:02x}", byte));
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_hex_and_unique() {
        let a = Session::new("abc", 300);
        let b = Session::new("abc", 300);
        assert_eq!(a.id.len(), 32);
        assert!(a.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn expiration_follows_duration() {
        let session = Session::new("abc", 300);
        assert_eq!(session.expiration, session.created_at + 300);
        assert!(!session.is_expired(session.created_at));
        assert!(session.is_expired(session.expiration + 1));
    }
}
