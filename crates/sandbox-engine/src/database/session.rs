//! Session identity.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use sandbox_sql::{NamespaceOptions, SessionNamespacer, SessionToken};

use super::error::SandboxResult;

/// An execution session.
///
/// A session is nothing more than a naming convention: objects created while
/// it is active carry its token as a prefix. Nothing is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    raw: String,
    token: SessionToken,
}

impl Session {
    /// Creates a session from a raw identifier.
    pub fn new(raw: &str, max_token_len: usize) -> SandboxResult<Self> {
        let token = SessionToken::sanitize_with_max(raw, max_token_len)?;
        Ok(Self {
            raw: raw.to_string(),
            token,
        })
    }

    /// Creates a `<user>_<unix millis>` session for a user.
    ///
    /// The user part is shortened first so the timestamp survives the
    /// token length limit.
    pub fn for_user(user_id: &str, max_token_len: usize) -> SandboxResult<Self> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let user = SessionToken::sanitize_with_max(user_id, usize::MAX)?;
        Self::new(
            &user_session_id(user.as_str(), millis, max_token_len),
            max_token_len,
        )
    }

    /// Returns the raw identifier.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Returns the sanitized token.
    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Returns the session-qualified form of an object name.
    pub fn object_name(&self, name: &str) -> String {
        format!("{}{}", self.token.prefix(), name)
    }

    /// Builds a namespacer for this session.
    pub fn namespacer(&self, options: &NamespaceOptions) -> SessionNamespacer {
        SessionNamespacer::with_options(self.token.clone(), options.clone())
    }
}

/// Joins a sanitized user part and a timestamp within `max_len` characters.
/// When both cannot fit, the low-order timestamp digits are kept.
fn user_session_id(user: &str, millis: u128, max_len: usize) -> String {
    let stamp = millis.to_string();
    let user_len = max_len.saturating_sub(stamp.len() + 1).max(1);
    let user = &user[..user_len.min(user.len())];
    let stamp_len = max_len.saturating_sub(user.len() + 1);
    let stamp = &stamp[stamp.len().saturating_sub(stamp_len)..];
    format!("{}_{}", user, stamp)
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token)
    }
}
