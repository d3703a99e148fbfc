//! Explicit caller identity.

use bookchat_core::{Username, ValidationError};

/// Who is speaking. Passed to every authoring call instead of being read
/// from ambient state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    username: Username,
}

impl Session {
    pub fn new(username: Username) -> Self {
        Self { username }
    }

    /// Start a session for a username given as text.
    pub fn parse(username: &str) -> Result<Self, ValidationError> {
        Ok(Self::new(Username::parse(username)?))
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    /// Follow an accepted username change.
    pub(crate) fn rename(&mut self, username: Username) {
        self.username = username;
    }
}
