//! Access records handed to the logging sink, one per request or attempt.
use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Short code recording which policy produced or altered an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatusFlag {
    /// Denied by the route rate limiter.
    #[serde(rename = "RL")]
    RateLimited,
    /// Downstream exceeded the route timeout.
    #[serde(rename = "UT")]
    UpstreamTimeout,
    /// Retry denied by the retry bucket.
    #[serde(rename = "RT-RL")]
    RetryRateLimited,
}

impl StatusFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusFlag::RateLimited => "RL",
            StatusFlag::UpstreamTimeout => "UT",
            StatusFlag::RetryRateLimited => "RT-RL",
        }
    }
}

impl fmt::Display for StatusFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const INGRESS_TRAFFIC: &str = "ingress";
pub const EGRESS_TRAFFIC: &str = "egress";
pub const PING_TRAFFIC: &str = "ping";

/// Snapshot of one exchange and of the controller state that governed it.
///
/// Behavior fields use `-1` for a disabled behavior, and an infinite rate limit is reported
/// as `99999`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessRecord {
    pub traffic: &'static str,
    pub start: DateTime<Utc>,
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub route: String,
    pub request_id: String,
    pub protocol: String,
    pub method: String,
    pub url: String,
    pub host: String,
    pub path: String,
    /// `0` when no response was produced.
    pub status_code: i32,
    pub bytes_written: Option<u64>,
    pub timeout_ms: i64,
    pub rate_limit: f64,
    pub rate_burst: i64,
    /// Present only when retry is enabled on the route; `true` for a retried attempt.
    pub retry: Option<bool>,
    pub proxy: bool,
    pub failover: bool,
    pub status_flag: Option<StatusFlag>,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

impl AccessRecord {
    pub fn status_flag_str(&self) -> &'static str {
        self.status_flag.map_or("", |f| f.as_str())
    }

    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX)
    }
}
