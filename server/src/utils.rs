use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

pub type Timestamp = DateTime<Utc>;

/// Wall clock used for every persisted timestamp.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

/// Random salt drawn once per process.
fn session_salt() -> &'static [u8; 32] {
    static SALT: OnceLock<[u8; 32]> = OnceLock::new();
    SALT.get_or_init(rand::random)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Session key handed to the client on persona selection.
///
/// Stable for a connection within one process run. The process salt keeps
/// it unguessable from the sequential connection id.
pub fn session_key(connection_id: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_salt());
    hasher.update(connection_id.to_be_bytes());
    to_hex(&hasher.finalize())
}

/// Strips the dedicated-host `@` marker from a persona or account name.
/// Returns the bare name and whether the marker was present.
pub fn strip_host_marker(name: &str) -> (String, bool) {
    if name.contains('@') {
        (name.replace('@', ""), true)
    } else {
        (name.to_string(), false)
    }
}

// Bit 16 of SYSFLAGS advertises a password protected game
pub fn sysflags_with_password(sysflags: &str, has_password: bool) -> String {
    if !has_password {
        return sysflags.to_string();
    }
    match sysflags.parse::<u64>() {
        Ok(flags) => (flags | (1 << 16)).to_string(),
        Err(_) => sysflags.to_string(),
    }
}

/// Timestamp format of the `WHEN` game field.
pub fn format_when(ts: &Timestamp) -> String {
    ts.format("%Y.%-m.%-d-%-H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_session_key_is_deterministic() {
        let a = session_key(42);
        assert_eq!(a, session_key(42));
        assert_ne!(a, session_key(43));
    }

    #[test]
    fn test_session_key_is_salted() {
        let a = session_key(42);
        let unsalted = to_hex(&Sha256::digest(42u64.to_be_bytes()));
        assert_ne!(session_key(42), unsalted);
        assert_ne!(session_key(42), to_hex(&Sha256::digest(b"42")));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_strip_host_marker() {
        assert_eq!(strip_host_marker("@host"), ("host".to_string(), true));
        assert_eq!(strip_host_marker("bo@b"), ("bob".to_string(), true));
        assert_eq!(strip_host_marker("alice"), ("alice".to_string(), false));
    }

    #[test]
    fn test_sysflags_password_bit() {
        assert_eq!(sysflags_with_password("0", true), "65536");
        assert_eq!(sysflags_with_password("512", false), "512");
        assert_eq!(sysflags_with_password("junk", true), "junk");
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2007, 3, 4, 5, 6, 7).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::seconds(91));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(91));
        assert_eq!(format_when(&start), "2007.3.4-5:06:07");
    }
}
