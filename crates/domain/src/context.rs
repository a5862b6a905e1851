//! Ambient request context.
//!
//! Carries the identity of the end user through every layer down to the
//! provider adapter, which tags outbound requests with it. Passed by
//! reference; cloning is cheap.

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user_id: String,
    pub session_id: Option<String>,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: None,
        }
    }

    pub fn for_session(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: Some(session_id.into()),
        }
    }
}
