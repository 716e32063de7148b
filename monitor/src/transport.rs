use crate::errors::{Error, Result};
use crate::model::{Command, CommandStatus};
use rand::Rng;
use rumqttc::{AsyncClient, QoS};
use serde_json::json;
use tracing::{debug, warn};

/// Probability that a simulated command reaches the bin
pub const DEFAULT_SUCCESS_RATE: f64 = 0.8;

/// Outbound path from the monitor to a bin.
///
/// Returns the terminal status of the delivery attempt; a failed delivery is
/// an ordinary outcome, not an error.
pub trait CommandTransport: Send {
    fn deliver(&mut self, command: &Command) -> CommandStatus;
}

impl<T: CommandTransport + ?Sized> CommandTransport for Box<T> {
    fn deliver(&mut self, command: &Command) -> CommandStatus {
        (**self).deliver(command)
    }
}

/// Lossy radio/SMS link that delivers with a fixed probability
#[derive(Debug)]
pub struct SimulatedLink<R> {
    rng: R,
    success_rate: f64,
}

impl<R: Rng + Send> SimulatedLink<R> {
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            success_rate: DEFAULT_SUCCESS_RATE,
        }
    }

    pub fn with_success_rate(rng: R, success_rate: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&success_rate) {
            return Err(Error::Config(format!(
                "command success rate {} outside [0, 1]",
                success_rate
            )));
        }
        Ok(Self { rng, success_rate })
    }
}

impl<R: Rng + Send> CommandTransport for SimulatedLink<R> {
    fn deliver(&mut self, command: &Command) -> CommandStatus {
        if self.rng.gen_bool(self.success_rate) {
            debug!("Simulated link delivered {} to {}", command.kind.as_str(), command.bin_id);
            CommandStatus::Sent
        } else {
            debug!("Simulated link dropped {} to {}", command.kind.as_str(), command.bin_id);
            CommandStatus::Failed
        }
    }
}

/// Publishes commands to `devices/<bin_id>/command` for the bin's firmware
pub struct MqttCommandTransport {
    client: AsyncClient,
}

impl MqttCommandTransport {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

pub fn command_topic(bin_id: &str) -> String {
    format!("devices/{}/command", bin_id)
}

impl CommandTransport for MqttCommandTransport {
    fn deliver(&mut self, command: &Command) -> CommandStatus {
        let payload = json!({
            "id": command.id,
            "type": command.kind,
        })
        .to_string();

        match self
            .client
            .try_publish(command_topic(&command.bin_id), QoS::AtLeastOnce, false, payload)
        {
            Ok(()) => CommandStatus::Sent,
            Err(e) => {
                warn!("Failed to publish command to {}: {}", command.bin_id, e);
                CommandStatus::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CommandKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_forced_outcomes() {
        let command = Command::pending("bin001", CommandKind::Compress);

        let mut always = SimulatedLink::with_success_rate(StdRng::seed_from_u64(1), 1.0).unwrap();
        let mut never = SimulatedLink::with_success_rate(StdRng::seed_from_u64(1), 0.0).unwrap();

        for _ in 0..20 {
            assert_eq!(always.deliver(&command), CommandStatus::Sent);
            assert_eq!(never.deliver(&command), CommandStatus::Failed);
        }
    }

    #[test]
    fn test_rejects_bad_rate() {
        assert!(SimulatedLink::with_success_rate(StdRng::seed_from_u64(1), 1.5).is_err());
        assert!(SimulatedLink::with_success_rate(StdRng::seed_from_u64(1), -0.1).is_err());
    }

    #[test]
    fn test_default_rate_mostly_delivers() {
        let command = Command::pending("bin001", CommandKind::Status);
        let mut link = SimulatedLink::new(StdRng::seed_from_u64(42));

        let sent = (0..1000)
            .filter(|_| link.deliver(&command) == CommandStatus::Sent)
            .count();
        assert!((700..900).contains(&sent), "sent {} of 1000", sent);
    }

    #[test]
    fn test_seeded_links_agree() {
        let command = Command::pending("bin001", CommandKind::Compress);
        let mut a = SimulatedLink::new(StdRng::seed_from_u64(7));
        let mut b = SimulatedLink::new(StdRng::seed_from_u64(7));

        for _ in 0..50 {
            assert_eq!(a.deliver(&command), b.deliver(&command));
        }
    }

    #[test]
    fn test_command_topic() {
        assert_eq!(command_topic("bin003"), "devices/bin003/command");
    }
}
