//! Rate limiting for repetitive log statements.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        LazyLock,
    },
    time::{Duration, Instant},
};

/// Reference point all throttles measure elapsed time from.
static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Last time a throttled statement ran, in milliseconds since [`EPOCH`].
///
/// One instance lives in a static per [`throttle!`] call site.
#[doc(hidden)]
#[derive(Debug)]
pub struct Throttle {
    last: AtomicU64,
}

impl Throttle {
    const IDLE: u64 = u64::MAX;

    /// A throttle that lets the first call through.
    pub const fn new() -> Self {
        Self { last: AtomicU64::new(Self::IDLE) }
    }

    /// Returns true if the statement may run now, claiming the slot for `period`.
    ///
    /// Concurrent callers race on the slot, only one of them wins.
    pub fn ready(&self, period: Duration) -> bool {
        let now = EPOCH.elapsed().as_millis() as u64;
        let last = self.last.load(Ordering::Relaxed);
        if last != Self::IDLE && now.saturating_sub(last) < period.as_millis() as u64 {
            return false
        }
        self.last.compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed).is_ok()
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluates the expression at most once per `period` for this call site.
///
/// ```
/// use chainsync_tracing::throttle;
/// use std::time::Duration;
///
/// throttle!(Duration::from_secs(1), || {
///     chainsync_tracing::tracing::warn!("Peer exceeded announcement limit");
/// });
/// ```
#[macro_export]
macro_rules! throttle {
    ($period:expr, || $expr:expr) => {{
        static THROTTLE: $crate::__private::Throttle = $crate::__private::Throttle::new();
        if THROTTLE.ready($period) {
            $expr
        }
    }};
}
