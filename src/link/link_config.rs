use std::time::Duration;

use anyhow::bail;

/// Simulated packet loss for testing a deployment without actual radio trouble
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// 0 to 100
    pub packet_loss_percent: u8,
}

/// Static per-link configuration, fixed when the link's session is created
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub name: String,

    pub simulation: Option<SimulationConfig>,

    /// the link is connected to a radio modem that injects radio status reports, and their link
    ///  health fields should be tracked
    pub radio_status_link: bool,

    /// drop messages that were forwarded recently via this or any other link
    pub reject_repeat_packets: bool,

    /// Rewrite sequence numbers of outgoing messages to a gap-free per-source sequence. This is
    ///  experimental: checksum extras of custom message kinds are guessed by brute force.
    pub resequence_outgoing: bool,

    pub inbound_queue_capacity: usize,
    pub outbound_queue_capacity: usize,

    /// a source that was silent on this link for longer than this is removed from the link
    pub source_timeout: Duration,
    /// the interval at which sources send heartbeats - the part of the time between heartbeats
    ///  that exceeds this is treated as link delay
    pub heartbeat_period: Duration,
    /// how often a running session checks for timed out sources
    pub liveness_check_interval: Duration,
}

impl LinkConfig {
    pub fn new(name: impl Into<String>) -> LinkConfig {
        LinkConfig {
            name: name.into(),
            simulation: None,
            radio_status_link: false,
            reject_repeat_packets: true,
            resequence_outgoing: false,
            inbound_queue_capacity: 1024,
            outbound_queue_capacity: 1024,
            source_timeout: Duration::from_secs(10),
            heartbeat_period: Duration::from_secs(1),
            liveness_check_interval: Duration::from_secs(1),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            bail!("link name must not be empty");
        }
        if let Some(simulation) = &self.simulation {
            if simulation.packet_loss_percent > 100 {
                bail!("link {}: simulated packet loss of {}% is more than 100%", self.name, simulation.packet_loss_percent);
            }
        }
        if self.inbound_queue_capacity == 0 || self.outbound_queue_capacity == 0 {
            bail!("link {}: queue capacities must be positive", self.name);
        }
        if self.source_timeout.is_zero() || self.liveness_check_interval.is_zero() {
            bail!("link {}: source timeout and liveness check interval must be positive", self.name);
        }
        Ok(())
    }
}
