//! Login-attempt throttling.
//!
//! Applied to the attempt counter as it stood *before* the current attempt
//! was recorded, together with the previous `last_login_attempt_at`.

use chrono::{DateTime, Duration, Utc};

/// Once `min_attempts` failed attempts have accumulated, the caller must wait
/// `cooldown` after the last attempt before trying again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleRule {
    pub min_attempts: i32,
    pub cooldown: Duration,
}

/// Rejection carrying how long the caller still has to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttled {
    pub retry_after: Duration,
}

impl Throttled {
    /// Remaining wait rounded up to whole minutes (at least 1).
    pub fn minutes(&self) -> i64 {
        let secs = self.retry_after.num_seconds().max(1);
        (secs + 59) / 60
    }
}

/// Ordered set of throttle rules; the strictest matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginThrottle {
    rules: Vec<ThrottleRule>,
}

impl Default for LoginThrottle {
    /// 5 attempts: 1 minute. 10 attempts: 1 hour.
    fn default() -> Self {
        Self::new(vec![
            ThrottleRule {
                min_attempts: 5,
                cooldown: Duration::minutes(1),
            },
            ThrottleRule {
                min_attempts: 10,
                cooldown: Duration::hours(1),
            },
        ])
    }
}

impl LoginThrottle {
    pub fn new(mut rules: Vec<ThrottleRule>) -> Self {
        rules.sort_by(|a, b| b.min_attempts.cmp(&a.min_attempts));
        Self { rules }
    }

    /// A throttle that never rejects.
    pub fn disabled() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn rules(&self) -> &[ThrottleRule] {
        &self.rules
    }

    /// Check whether another attempt is allowed at `now`.
    pub fn check(
        &self,
        attempts: i32,
        last_attempt_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), Throttled> {
        let Some(rule) = self.rules.iter().find(|r| attempts >= r.min_attempts) else {
            return Ok(());
        };
        let Some(last) = last_attempt_at else {
            return Ok(());
        };
        let unlocks_at = last
            .checked_add_signed(rule.cooldown)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if now < unlocks_at {
            return Err(Throttled {
                retry_after: unlocks_at - now,
            });
        }
        Ok(())
    }
}
