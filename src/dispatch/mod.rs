pub mod async_poll;
pub mod http;
pub mod registry;

use std::fmt;
use std::time::{Duration, Instant};

use crate::dispatch::async_poll::AsyncPollDispatch;
use crate::dispatch::http::HttpDispatch;
use crate::dispatch::registry::{ProtocolMode, ProviderDescriptor};
use crate::error::ImagecastError;

/// Largest width or height accepted from callers.
pub const MAX_DIMENSION: u32 = 8192;

/// Requested image dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Result<Self, ImagecastError> {
        if width == 0 || height == 0 {
            return Err(ImagecastError::InvalidRequest(format!(
                "image size must be non-zero, got {width}x{height}"
            )));
        }
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(ImagecastError::InvalidRequest(format!(
                "image size {width}x{height} exceeds {MAX_DIMENSION}px"
            )));
        }
        Ok(Self { width, height })
    }

    /// Parse `WIDTHxHEIGHT`. `*` and `X` are accepted as separators too.
    pub fn parse(s: &str) -> Result<Self, ImagecastError> {
        let invalid = || ImagecastError::InvalidRequest(format!("invalid size: {s:?}"));
        let (w, h) = s
            .trim()
            .split_once(['x', 'X', '*'])
            .ok_or_else(invalid)?;
        let width = w.trim().parse().map_err(|_| invalid())?;
        let height = h.trim().parse().map_err(|_| invalid())?;
        Self::new(width, height)
    }

    /// Size token for synchronous providers. Portrait requests are sent with a
    /// halved width since these endpoints reject tall aspect ratios.
    pub fn sync_token(&self) -> String {
        if self.height > self.width {
            format!("{}x{}", (self.width / 2).max(1), self.height)
        } else {
            self.to_string()
        }
    }

    /// Size token with a provider-specific separator, e.g. `1024*2048`.
    pub fn token_with(&self, separator: char) -> String {
        format!("{}{separator}{}", self.width, self.height)
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Internal request type. Both sync and async-poll backends accept this.
#[derive(Clone, Debug)]
pub struct ImageRequest {
    pub prompt: String,
    pub model: String,
    pub size: ImageSize,
    /// True when the caller supplied `size` rather than inheriting the default.
    /// Some async providers only receive a size when one was asked for.
    pub size_explicit: bool,
    /// Budget the deadline was derived from, reported when it runs out.
    pub timeout: Duration,
    pub deadline: Instant,
}

impl ImageRequest {
    /// Time left before the caller's deadline, or Timeout if it already passed.
    pub fn remaining(&self) -> Result<Duration, ImagecastError> {
        self.deadline
            .checked_duration_since(Instant::now())
            .filter(|d| *d > Duration::from_millis(100))
            .ok_or(ImagecastError::Timeout(self.timeout.as_millis() as u64))
    }
}

/// Internal result type returned by every backend.
#[derive(Debug, Clone)]
pub struct RemoteImage {
    pub url: String,
    pub model: String,
    /// Wall time from first request to usable URL.
    pub latency_ms: u64,
}

/// Picks the execution strategy from the descriptor's protocol mode.
#[derive(Clone, Default)]
pub struct ProviderDispatch {
    http: HttpDispatch,
    async_poll: AsyncPollDispatch,
}

impl ProviderDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fetch_remote(
        &self,
        entry: &ProviderDescriptor,
        req: &ImageRequest,
    ) -> Result<RemoteImage, ImagecastError> {
        match &entry.protocol {
            ProtocolMode::Sync => {
                self.http
                    .query_model(req, &entry.key, &entry.base_url, &entry.api_key)
                    .await
            }
            ProtocolMode::AsyncPoll { api, poll } => {
                self.async_poll
                    .query_model(req, &entry.key, *api, &entry.base_url, &entry.api_key, *poll)
                    .await
            }
        }
    }
}
