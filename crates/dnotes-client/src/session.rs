//! Per-instance stream session id

use std::fmt;

use chrono::Utc;
use uuid::Uuid;

/// Length of the random suffix appended to the timestamp
const SUFFIX_LEN: usize = 9;

/// Identifies one client instance for its whole lifetime
///
/// Locally originated writes are tagged with this id so that echoes coming
/// back over the push stream can be recognised.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamSession {
    id: String,
}

impl StreamSession {
    /// Generate a new session id from the current time and a random suffix
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{}-{}", Utc::now().timestamp_millis(), &suffix[..SUFFIX_LEN]),
        }
    }

    /// The session id
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
