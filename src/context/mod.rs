//! Per-request context handed to route handlers.

use serde::de::DeserializeOwned;

use crate::http::Request;

/// Wraps the incoming [`Request`] for a handler.
pub struct Context {
    request: Request,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self { request }
    }

    /// Decodes the request body as JSON into `T`.
    ///
    /// # Errors
    ///
    /// Returns the [`serde_json::Error`] describing why the body is not a valid `T`.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }
}
