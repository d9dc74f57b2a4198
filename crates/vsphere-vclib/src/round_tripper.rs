use std::future::{Ready, ready};

use tower::retry::Policy;
use tracing::debug;

use crate::transport::TransportError;

/// Number of retries for temporary network errors if none is configured.
pub const ROUND_TRIPPER_DEFAULT_COUNT: u32 = 3;

/// A [`Policy`] retrying requests which failed with a temporary network
/// error, at most `attempts` times per request.
///
/// Application level failures, e.g. rejected logins, are never retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TemporaryNetworkErrorPolicy {
    remaining: u32,
}

impl TemporaryNetworkErrorPolicy {
    pub fn new(attempts: u32) -> Self {
        Self {
            remaining: attempts,
        }
    }

    /// Uses `count` unless it is unset or zero, in which case
    /// [`ROUND_TRIPPER_DEFAULT_COUNT`] applies.
    pub fn from_count(count: Option<u32>) -> Self {
        Self::new(
            count
                .filter(|count| *count > 0)
                .unwrap_or(ROUND_TRIPPER_DEFAULT_COUNT),
        )
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl Default for TemporaryNetworkErrorPolicy {
    fn default() -> Self {
        Self::new(ROUND_TRIPPER_DEFAULT_COUNT)
    }
}

impl<Req, Res, E> Policy<Req, Res, E> for TemporaryNetworkErrorPolicy
where
    Req: Clone,
    E: TransportError,
{
    type Future = Ready<()>;

    fn retry(&mut self, _req: &mut Req, result: &mut Result<Res, E>) -> Option<Self::Future> {
        let Err(error) = result else {
            return None;
        };

        if self.remaining == 0 || !error.is_temporary() {
            return None;
        }

        self.remaining -= 1;
        debug!(%error, remaining = self.remaining, "retrying request after temporary network error");
        Some(ready(()))
    }

    fn clone_request(&mut self, req: &Req) -> Option<Req> {
        Some(req.clone())
    }
}
