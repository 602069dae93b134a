use std::time::Duration;

/// Timing knobs of the leader subsystem.
///
/// Everything is derived from the heartbeat interval `H`: followers give up
/// on a silent leader after `follower_multiplier * H`, candidates abandon a
/// stuck election after `candidate_multiplier * H`, and observers wait
/// `H + rand(1..observer_multiplier * backoff * H)` before competing.
#[derive(Debug, Clone)]
pub struct LeaderConfig {
    /// Base heartbeat interval `H`.
    pub heartbeat_interval: Duration,
    /// Upper bound factor of the randomized observer wait.
    pub observer_multiplier: u32,
    /// Candidate timeout factor.
    pub candidate_multiplier: u32,
    /// Follower/voted timeout factor.
    pub follower_multiplier: u32,
    /// Ceiling of the exponential election backoff.
    pub max_backoff: u32,
    /// Post-quorum wait for outstanding votes carrying higher terms.
    pub extra_wait_time: Duration,
    /// Idle period before a membership self-check is started.
    pub check_member_after: Duration,
    /// How long a running membership check may take.
    pub check_member_timeout: Duration,
    /// Seed for the per-node PRNG; `None` seeds from entropy.
    pub randomization_seed: Option<u64>,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(100),
            observer_multiplier: 5,
            candidate_multiplier: 50,
            follower_multiplier: 20,
            max_backoff: 16,
            extra_wait_time: Duration::from_millis(10),
            check_member_after: Duration::from_secs(10),
            check_member_timeout: Duration::from_secs(10),
            randomization_seed: None,
        }
    }
}

impl LeaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_observer_multiplier(mut self, multiplier: u32) -> Self {
        self.observer_multiplier = multiplier;
        self
    }

    pub fn with_candidate_multiplier(mut self, multiplier: u32) -> Self {
        self.candidate_multiplier = multiplier;
        self
    }

    pub fn with_follower_multiplier(mut self, multiplier: u32) -> Self {
        self.follower_multiplier = multiplier;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: u32) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_extra_wait_time(mut self, extra_wait: Duration) -> Self {
        self.extra_wait_time = extra_wait;
        self
    }

    pub fn with_check_member_after(mut self, after: Duration) -> Self {
        self.check_member_after = after;
        self
    }

    pub fn with_check_member_timeout(mut self, timeout: Duration) -> Self {
        self.check_member_timeout = timeout;
        self
    }

    pub fn with_randomization_seed(mut self, seed: u64) -> Self {
        self.randomization_seed = Some(seed);
        self
    }

    /// Follower and voted-for timeout.
    pub(crate) fn follower_timeout(&self) -> Duration {
        self.heartbeat_interval * self.follower_multiplier
    }

    /// Candidate timeout.
    pub(crate) fn candidate_timeout(&self) -> Duration {
        self.heartbeat_interval * self.candidate_multiplier
    }
}
