//! Scripted positioning source for demos and tests

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::debug;

use super::{Accuracy, Availability, PositionSource};
use crate::Result;
use crate::types::RawFix;

/// Replays a fixed list of fixes, one per call.
///
/// After the script runs out it yields `None`, unless built with
/// [`ScriptedPositionSource::repeating`].
pub struct ScriptedPositionSource {
    fixes: Mutex<VecDeque<RawFix>>,
    repeat: Option<RawFix>,
    availability: Availability,
}

impl ScriptedPositionSource {
    pub fn new(fixes: impl IntoIterator<Item = RawFix>) -> Self {
        Self {
            fixes: Mutex::new(fixes.into_iter().collect()),
            repeat: None,
            availability: Availability::Available,
        }
    }

    /// Yield the same fix forever.
    pub fn repeating(fix: RawFix) -> Self {
        Self { fixes: Mutex::new(VecDeque::new()), repeat: Some(fix), availability: Availability::Available }
    }

    pub fn with_availability(mut self, availability: Availability) -> Self {
        self.availability = availability;
        self
    }

    /// Fixes not yet handed out.
    pub fn remaining(&self) -> usize {
        self.fixes.lock().map(|f| f.len()).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl PositionSource for ScriptedPositionSource {
    fn availability(&self) -> Availability {
        self.availability
    }

    async fn next_fix(&self, _accuracy: Accuracy) -> Result<Option<RawFix>> {
        let next = self.fixes.lock().ok().and_then(|mut fixes| fixes.pop_front());
        if next.is_none() && self.repeat.is_none() {
            debug!("Scripted positions exhausted");
        }
        Ok(next.or(self.repeat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_then_runs_dry() {
        let source = ScriptedPositionSource::new([RawFix::new(1.0, 1.0, 1), RawFix::new(2.0, 2.0, 2)]);

        assert_eq!(source.next_fix(Accuracy::High).await.unwrap().map(|f| f.timestamp_millis), Some(1));
        assert_eq!(source.remaining(), 1);
        assert_eq!(source.next_fix(Accuracy::High).await.unwrap().map(|f| f.timestamp_millis), Some(2));
        assert_eq!(source.next_fix(Accuracy::High).await.unwrap(), None);
    }

    #[tokio::test]
    async fn repeating_never_runs_dry() {
        let source = ScriptedPositionSource::repeating(RawFix::new(1.0, 1.0, 7));
        for _ in 0..3 {
            assert!(source.next_fix(Accuracy::LowPower).await.unwrap().is_some());
        }
    }
}
