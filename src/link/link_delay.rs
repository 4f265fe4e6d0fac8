use std::time::Duration;

use tokio::time::Instant;

use crate::link::link_quality::LinkQuality;


/// Derives a link's delay from the arrival times of heartbeats: sources send them at a nominal
///  period, so any additional time between two heartbeats is attributed to the link.
///
/// This is a coarse estimate. It assumes a single heartbeat source per link, and time between
///  heartbeats shorter than the nominal period yields a delay of zero.
pub struct LinkDelayEstimator {
    nominal_heartbeat_period: Duration,
}

impl LinkDelayEstimator {
    pub fn new(nominal_heartbeat_period: Duration) -> LinkDelayEstimator {
        LinkDelayEstimator {
            nominal_heartbeat_period,
        }
    }

    /// Registers a heartbeat, returning the new delay sample. The first heartbeat on a link only
    ///  sets the baseline.
    pub fn on_heartbeat(&self, quality: &mut LinkQuality, now: Instant) -> Option<Duration> {
        let sample = quality.last_heartbeat
            .map(|last| now.saturating_duration_since(last).saturating_sub(self.nominal_heartbeat_period));

        quality.last_heartbeat = Some(now);
        if let Some(delay) = sample {
            quality.link_delay = delay;
        }
        sample
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_first_heartbeat_is_baseline() {
        let estimator = LinkDelayEstimator::new(ms(1000));
        let mut quality = LinkQuality::default();
        let t0 = Instant::now();

        assert_eq!(estimator.on_heartbeat(&mut quality, t0), None);
        assert_eq!(quality.last_heartbeat, Some(t0));
        assert_eq!(quality.link_delay, Duration::ZERO);
    }

    #[rstest]
    #[case::on_time(ms(1000), ms(0))]
    #[case::late(ms(1350), ms(350))]
    #[case::very_late(ms(4000), ms(3000))]
    #[case::early(ms(900), ms(0))]
    fn test_delay_sample(#[case] interval: Duration, #[case] expected: Duration) {
        let estimator = LinkDelayEstimator::new(ms(1000));
        let mut quality = LinkQuality::default();
        let t0 = Instant::now();

        estimator.on_heartbeat(&mut quality, t0);
        assert_eq!(estimator.on_heartbeat(&mut quality, t0 + interval), Some(expected));
        assert_eq!(quality.link_delay, expected);
        assert_eq!(quality.last_heartbeat, Some(t0 + interval));
    }

    #[test]
    fn test_each_sample_replaces_the_previous() {
        let estimator = LinkDelayEstimator::new(ms(1000));
        let mut quality = LinkQuality::default();
        let t0 = Instant::now();

        estimator.on_heartbeat(&mut quality, t0);
        estimator.on_heartbeat(&mut quality, t0 + ms(1500));
        estimator.on_heartbeat(&mut quality, t0 + ms(2600));
        assert_eq!(quality.link_delay, ms(100));
    }
}
