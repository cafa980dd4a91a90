//! Transfer configuration

use std::num::NonZeroU64;

use crate::core::error::{Error, Result};
use crate::core::gauge::MovingAverage;
use crate::core::limiter::TokenBucket;

/// Default chunk size (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default moving-average window: six one-second samples
pub const DEFAULT_GAUGE_WINDOW: usize = 6;

/// Options for transfer operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    /// Bytes moved per chunk; cancellation and rate limiting act at this granularity
    pub chunk_size: usize,

    /// Number of one-second samples the rate estimate is averaged over
    pub gauge_window: usize,

    /// Bandwidth ceiling in bytes per second, `None` for unlimited
    pub rate_limit: Option<u64>,

    /// Burst allowance in bytes; defaults to one second at `rate_limit`
    pub burst: Option<u64>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            gauge_window: DEFAULT_GAUGE_WINDOW,
            rate_limit: None,
            burst: None,
        }
    }
}

impl TransferOptions {
    /// Checks the options for values the copy loop cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk size must be greater than zero".to_string()));
        }
        if self.rate_limit == Some(0) {
            return Err(Error::InvalidConfig(
                "rate limit must be greater than zero (omit it for unlimited)".to_string(),
            ));
        }
        if self.burst == Some(0) {
            return Err(Error::InvalidConfig("burst must be greater than zero".to_string()));
        }
        Ok(())
    }

    /// Builds the token bucket described by `rate_limit` and `burst`, if any.
    pub fn limiter(&self) -> Option<TokenBucket> {
        let rate = NonZeroU64::new(self.rate_limit?)?;
        let burst = self.burst.and_then(NonZeroU64::new);
        Some(TokenBucket::with_burst(rate, burst))
    }

    /// Builds the default gauge for these options.
    pub fn gauge(&self) -> MovingAverage {
        MovingAverage::new(self.gauge_window)
    }
}

/// Parses a byte size such as `512`, `64K`, `1.5M` or `2GiB`.
///
/// Suffixes are binary multiples and case-insensitive; a trailing `B` or `iB`
/// is accepted.
pub fn parse_size(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let invalid = || Error::InvalidConfig(format!("invalid size: '{input}'"));

    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);
    if number.is_empty() {
        return Err(invalid());
    }

    let suffix = suffix.trim().to_ascii_lowercase();
    let unit = suffix
        .strip_suffix("ib")
        .or_else(|| suffix.strip_suffix('b'))
        .unwrap_or(&suffix);
    let multiplier: u64 = match unit {
        "" => 1,
        "k" => 1 << 10,
        "m" => 1 << 20,
        "g" => 1 << 30,
        "t" => 1 << 40,
        _ => return Err(invalid()),
    };

    if let Ok(whole) = number.parse::<u64>() {
        return whole.checked_mul(multiplier).ok_or_else(invalid);
    }

    let value: f64 = number.parse().map_err(|_| invalid())?;
    let bytes = value * multiplier as f64;
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(bytes.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = TransferOptions::default();
        assert_eq!(options.chunk_size, 64 * 1024);
        assert_eq!(options.gauge_window, 6);
        assert!(options.validate().is_ok());
        assert!(options.limiter().is_none());
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let options = TransferOptions {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        let options = TransferOptions {
            rate_limit: Some(0),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_limiter_from_options() {
        let options = TransferOptions {
            rate_limit: Some(1 << 20),
            burst: Some(256 * 1024),
            ..Default::default()
        };

        let limiter = options.limiter().expect("rate limit set");
        assert_eq!(limiter.limit(), 1 << 20);
        assert_eq!(limiter.burst(), 256 * 1024);
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("64K").unwrap(), 64 * 1024);
        assert_eq!(parse_size("64k").unwrap(), 64 * 1024);
        assert_eq!(parse_size("1M").unwrap(), 1 << 20);
        assert_eq!(parse_size("1MiB").unwrap(), 1 << 20);
        assert_eq!(parse_size("2GB").unwrap(), 2 << 30);
        assert_eq!(parse_size("1.5M").unwrap(), 3 << 19);
        assert_eq!(parse_size(" 10 KiB ").unwrap(), 10 * 1024);
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("M").is_err());
        assert!(parse_size("12X").is_err());
        assert!(parse_size("-5").is_err());
        assert!(parse_size("99999999999T").is_err());
    }
}
