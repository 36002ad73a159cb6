//! Monitored target definitions

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Utc, Weekday};
use regex::Regex;
use serde::Serialize;

/// A monitored endpoint. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Unique identity
    pub name: String,
    /// URL for `http`, `host:port` for `tcp`
    pub address: String,
    pub protocol: Protocol,
    /// Per-check deadline
    pub timeout: Duration,
    /// Polling cadence
    pub interval: Duration,
    /// Consecutive non-UP results before declaring DOWN
    pub failure_threshold: u32,
    pub expect: ExpectedResponse,
    /// When set, checks only run inside these hours
    pub active_hours: Option<ActiveHours>,
}

impl Target {
    /// Create a target with default check parameters
    pub fn new(name: impl Into<String>, address: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            protocol,
            timeout: Duration::from_secs(10),
            interval: Duration::from_secs(60),
            failure_threshold: 1,
            expect: ExpectedResponse::default(),
            active_hours: None,
        }
    }

    /// Set polling interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set check timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set expected response criteria
    pub fn with_expect(mut self, expect: ExpectedResponse) -> Self {
        self.expect = expect;
        self
    }

    /// Restrict checks to the given hours
    pub fn with_active_hours(mut self, hours: ActiveHours) -> Self {
        self.active_hours = Some(hours);
        self
    }

    /// Whether a check should run at `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.active_hours
            .as_ref()
            .map(|hours| hours.contains(now))
            .unwrap_or(true)
    }
}

/// Check protocol kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// HTTP(S) GET evaluated against [`ExpectedResponse`]
    Http,
    /// Plain TCP connect
    Tcp,
}

impl Protocol {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" | "https" => Some(Protocol::Http),
            "tcp" => Some(Protocol::Tcp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Tcp => write!(f, "tcp"),
        }
    }
}

/// Criteria an HTTP response must satisfy to count as UP
#[derive(Debug, Clone, Default)]
pub struct ExpectedResponse {
    /// Accepted status codes; empty accepts any 2xx
    pub status: Vec<u16>,
    /// Body must contain this substring
    pub body_contains: Option<String>,
    /// Body must match this pattern
    pub body_regex: Option<Regex>,
}

impl ExpectedResponse {
    pub fn status_ok(&self, status: u16) -> bool {
        if self.status.is_empty() {
            (200..300).contains(&status)
        } else {
            self.status.contains(&status)
        }
    }

    /// Whether the body has to be read at all
    pub fn needs_body(&self) -> bool {
        self.body_contains.is_some() || self.body_regex.is_some()
    }

    pub fn body_ok(&self, body: &str) -> bool {
        let contains = self
            .body_contains
            .as_deref()
            .map(|needle| body.contains(needle))
            .unwrap_or(true);
        let matches = self
            .body_regex
            .as_ref()
            .map(|re| re.is_match(body))
            .unwrap_or(true);
        contains && matches
    }
}

impl PartialEq for ExpectedResponse {
    fn eq(&self, other: &Self) -> bool {
        self.status == other.status
            && self.body_contains == other.body_contains
            && self.body_regex.as_ref().map(Regex::as_str)
                == other.body_regex.as_ref().map(Regex::as_str)
    }
}

/// Local-time windows during which a target is checked
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveHours {
    pub offset: FixedOffset,
    pub weekdays_only: bool,
    /// `(start, end)` pairs, inclusive; `end < start` wraps past midnight.
    /// Empty means all day.
    pub windows: Vec<(NaiveTime, NaiveTime)>,
}

impl ActiveHours {
    /// Parse `"HH:MM-HH:MM"` windows
    pub fn new(
        utc_offset_hours: i32,
        weekdays_only: bool,
        windows: &[String],
    ) -> Result<Self, String> {
        let offset = utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| format!("utc offset {utc_offset_hours}h out of range"))?;

        let windows = windows
            .iter()
            .map(|w| parse_window(w))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            offset,
            weekdays_only,
            windows,
        })
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset);
        if self.weekdays_only && matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        if self.windows.is_empty() {
            return true;
        }

        let t = local.time();
        self.windows.iter().any(|&(start, end)| {
            if start <= end {
                t >= start && t <= end
            } else {
                t >= start || t <= end
            }
        })
    }
}

fn parse_window(window: &str) -> Result<(NaiveTime, NaiveTime), String> {
    let (start, end) = window
        .split_once('-')
        .ok_or_else(|| format!("window '{window}' is not HH:MM-HH:MM"))?;
    let parse = |s: &str| {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map_err(|_| format!("'{}' is not a HH:MM time", s.trim()))
    };
    Ok((parse(start)?, parse(end)?))
}
