#[cfg(test)]
use std::sync::{Arc, Mutex};

#[cfg(test)]
use time::Duration;
use time::{format_description::well_known::Rfc3339, OffsetDateTime, UtcOffset};

/// Wall clock used for every deadline computation. Tests swap in [`ManualClock`].
pub(crate) trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct ManualClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

#[cfg(test)]
impl ManualClock {
    pub(crate) fn new(now: OffsetDateTime) -> Self {
        Self { now: Arc::new(Mutex::new(now)) }
    }

    pub(crate) fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += by;
    }

    pub(crate) fn set(&self, value: OffsetDateTime) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = value;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub(crate) fn format_offset(value: OffsetDateTime) -> String {
    value.to_offset(UtcOffset::UTC).format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}

pub(crate) fn to_unix_millis(value: OffsetDateTime) -> i64 {
    (value.unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn from_unix_millis(millis: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000).ok()
}

/// `mm:ss`, minutes are not wrapped into hours.
pub(crate) fn format_countdown(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
