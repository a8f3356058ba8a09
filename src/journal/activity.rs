use std::{fmt, time::Duration};

use super::histogram::{BinReducer, Histogram, log2_millis};

// -----------------------------------------------------------------------------
// ----- Activity --------------------------------------------------------------

/// What a socket was waiting on when a wait time is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Activity {
    /// Gap between two network events on the same socket.
    Network,
    /// Time spent inside protocol handling for one event.
    IomCode,
    Connect,
    SslConnect,
    /// Our side ended and the peer saw everything we wrote.
    Finish,
    /// The peer ended its side.
    End,
    Close,
    /// Throttled write until the transport drained.
    Drained,
}

impl Activity {
    pub const ALL: [Activity; 8] = [
        Activity::Network,
        Activity::IomCode,
        Activity::Connect,
        Activity::SslConnect,
        Activity::Finish,
        Activity::End,
        Activity::Close,
        Activity::Drained,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Activity::Network => "network",
            Activity::IomCode => "iom_code",
            Activity::Connect => "connect",
            Activity::SslConnect => "ssl_connect",
            Activity::Finish => "finish",
            Activity::End => "end",
            Activity::Close => "close",
            Activity::Drained => "drained",
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -----------------------------------------------------------------------------
// ----- ActivityCounts --------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityCounts {
    /// Timeouts taken outside the idle pool.
    pub idle: u64,
    pub end: u64,
    pub error: u64,
    pub close: u64,
}

// -----------------------------------------------------------------------------
// ----- ActivityStats ---------------------------------------------------------

/// Wait-time histograms and event counters across all sockets.
#[derive(Debug, Clone)]
pub struct ActivityStats {
    waits: [Histogram; 8],
    pub counts: ActivityCounts,
}

impl Default for ActivityStats {
    fn default() -> Self {
        Self::new(log2_millis)
    }
}

impl ActivityStats {
    pub fn new(reducer: BinReducer) -> Self {
        Self {
            waits: std::array::from_fn(|_| Histogram::new(reducer)),
            counts: ActivityCounts::default(),
        }
    }

    pub fn record(&mut self, activity: Activity, waited: Duration) {
        self.waits[activity.index()].record(waited);
    }

    pub fn wait(&self, activity: Activity) -> &Histogram {
        &self.waits[activity.index()]
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_are_tracked_per_activity() {
        let mut stats = ActivityStats::default();
        stats.record(Activity::Connect, Duration::from_millis(12));
        stats.record(Activity::Connect, Duration::from_millis(14));
        stats.record(Activity::Drained, Duration::from_millis(1));

        assert_eq!(stats.wait(Activity::Connect).count(), 2);
        assert_eq!(stats.wait(Activity::Connect).hits(16), 2);
        assert_eq!(stats.wait(Activity::Drained).count(), 1);
        assert_eq!(stats.wait(Activity::Network).count(), 0);
    }

    #[test]
    fn all_lists_every_activity_once() {
        for (i, activity) in Activity::ALL.iter().enumerate() {
            assert_eq!(activity.index(), i);
        }
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
