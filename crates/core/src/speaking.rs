use std::time::Duration;
use tokio::time::Instant;

/// Turns a stream of message notifications into an "agent is speaking" flag.
///
/// Every message sets the flag and pushes a single deadline `hold` into the
/// future. The flag drops when the deadline passes with no newer message.
/// There is never more than one deadline; a rearm replaces it.
#[derive(Debug)]
pub struct SpeakingInferrer {
    hold: Duration,
    deadline: Option<Instant>,
}

impl SpeakingInferrer {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            deadline: None,
        }
    }

    pub fn hold(&self) -> Duration {
        self.hold
    }

    /// Records a message at `now` and rearms the deadline.
    pub fn on_message(&mut self, now: Instant) {
        self.deadline = Some(now + self.hold);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves once the pending deadline passes, then disarms.
    ///
    /// Never resolves while disarmed. Dropping the returned future leaves the
    /// deadline in place, so it is safe to race inside `select!`.
    pub async fn expired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_near(elapsed: Duration, expected: Duration) {
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(5),
            "elapsed {elapsed:?}, expected about {expected:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expires_after_hold() {
        let mut inferrer = SpeakingInferrer::new(Duration::from_millis(2000));
        let start = Instant::now();
        inferrer.on_message(start);

        inferrer.expired().await;
        assert_near(start.elapsed(), Duration::from_millis(2000));
        assert!(!inferrer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_moves_deadline_to_last_message() {
        let mut inferrer = SpeakingInferrer::new(Duration::from_millis(2000));
        let start = Instant::now();
        inferrer.on_message(start);
        inferrer.on_message(start + Duration::from_millis(500));

        assert_eq!(
            inferrer.deadline(),
            Some(start + Duration::from_millis(2500))
        );
        inferrer.expired().await;
        assert_near(start.elapsed(), Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_deadline_never_fires() {
        let mut inferrer = SpeakingInferrer::new(Duration::from_millis(50));
        inferrer.on_message(Instant::now());
        inferrer.cancel();

        let fired = tokio::time::timeout(Duration::from_secs(5), inferrer.expired()).await;
        assert!(fired.is_err());
    }
}
