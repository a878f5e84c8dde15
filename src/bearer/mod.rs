//! # Bearer Module
//!
//! Brings a cellular packet-data session up for an upload and tears it down afterward.
//!
//! This module handles:
//! - Enabling the modem and starting a bearer through ModemManager (`mmcli`)
//! - Polling bearer status with a bounded retry budget
//! - Configuring the network interface with `ip`, routing only the collection host
//! - Setting the system clock from modem network time
//!
//! No default route is ever installed: the only reachable host over the bearer
//! is the configured collection target.

pub mod clock;
pub mod command;

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{BearerConfig, ModemConfig};
use crate::error::{CellscanError, Result};
use command::CommandRunner;

/// Network interface program
const IP: &str = "ip";

/// Addressing of an active packet-data session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BearerInfo {
    pub ip: Ipv4Addr,
    pub prefix: u8,
    pub gateway: Ipv4Addr,
    pub mtu: u32,
}

impl BearerInfo {
    /// Extract IPv4 settings from `mmcli -b <n>` output
    ///
    /// ```text
    ///   Status             |       connected: yes
    ///   ...
    ///   IPv4 configuration |         method: static
    ///                      |        address: 10.170.81.34
    ///                      |         prefix: 30
    ///                      |        gateway: 10.170.81.33
    ///                      |            mtu: 1500
    /// ```
    ///
    /// # Returns
    ///
    /// * `None` - Bearer not connected, or IPv4 settings missing or unparsable
    pub fn parse(output: &str) -> Option<Self> {
        let mut section = String::new();
        let mut connected = false;
        let mut ip = None;
        let mut prefix = None;
        let mut gateway = None;
        let mut mtu = None;

        for line in output.lines() {
            let Some((left, right)) = line.split_once('|') else {
                continue;
            };
            if !left.trim().is_empty() {
                section = left.trim().to_string();
            }
            let Some((key, value)) = right.split_once(':') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            if key == "connected" {
                connected = value == "yes";
            }
            if !section.starts_with("IPv4") {
                continue;
            }
            match key {
                "address" => ip = value.parse().ok(),
                "prefix" => prefix = value.parse().ok(),
                "gateway" => gateway = value.parse().ok(),
                "mtu" => mtu = value.parse().ok(),
                _ => {}
            }
        }

        if !connected {
            return None;
        }

        Some(Self {
            ip: ip?,
            prefix: prefix?,
            gateway: gateway?,
            mtu: mtu?,
        })
    }

    /// Network containing the bearer address
    pub fn network(&self) -> Result<Ipv4Network> {
        let net = Ipv4Network::new(self.ip, self.prefix)
            .map_err(|e| CellscanError::Parse(format!("bad bearer prefix {}: {}", self.prefix, e)))?;
        // mmcli reports the host address; `ip route` wants the network address
        Ipv4Network::new(net.network(), self.prefix)
            .map_err(|e| CellscanError::Parse(format!("bad bearer prefix {}: {}", self.prefix, e)))
    }
}

/// Packet-data connection used by the uploader
#[async_trait]
pub trait DataBearer: Send + Sync {
    /// Bring the bearer up with a route to the collection target only
    async fn connect(&self) -> Result<BearerInfo>;

    /// Tear the bearer down; failures are logged, never returned
    async fn disconnect(&self);
}

/// ModemManager-driven bearer
pub struct BearerManager {
    runner: Arc<dyn CommandRunner>,
    modem: ModemConfig,
    bearer: BearerConfig,
    target: Ipv4Addr,
}

impl BearerManager {
    pub fn new(runner: Arc<dyn CommandRunner>, modem: ModemConfig, bearer: BearerConfig, target: Ipv4Addr) -> Self {
        Self {
            runner,
            modem,
            bearer,
            target,
        }
    }

    async fn mmcli(&self, args: &[String]) -> Result<String> {
        self.runner.run(&self.modem.mmcli_path, args).await
    }

    async fn ip(&self, args: &[&str]) -> Result<String> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.runner.run(IP, &args).await
    }

    fn modem_args(&self, extra: &[&str]) -> Vec<String> {
        let mut args = vec!["-m".to_string(), self.modem.modem_index.to_string()];
        args.extend(extra.iter().map(|a| a.to_string()));
        args
    }

    fn bearer_args(&self, extra: &[&str]) -> Vec<String> {
        let mut args = vec!["-b".to_string(), self.bearer.bearer_index.to_string()];
        args.extend(extra.iter().map(|a| a.to_string()));
        args
    }

    /// Query bearer status once
    async fn check_bearer_status(&self) -> Option<BearerInfo> {
        match self.mmcli(&self.bearer_args(&[])).await {
            Ok(output) => {
                let info = BearerInfo::parse(&output);
                if info.is_none() {
                    debug!("Modem bearer check succeeded but did not show connected status");
                }
                info
            }
            Err(e) => {
                debug!("Checking modem bearer status failed: {}", e);
                None
            }
        }
    }

    /// Poll until the bearer reports connected or the poll budget runs out
    async fn wait_for_bearer(&self) -> Result<BearerInfo> {
        for attempt in 1..=self.bearer.max_polls {
            if let Some(info) = self.check_bearer_status().await {
                return Ok(info);
            }
            if attempt == self.bearer.max_polls {
                break;
            }
            debug!("Connecting modem for data, retry {}/{}", attempt, self.bearer.max_polls);

            if let Err(e) = self.mmcli(&self.bearer_args(&["-c"])).await {
                debug!("Modem connect command failed: {}", e);
            }
            tokio::time::sleep(self.bearer.poll_interval()).await;
        }

        Err(CellscanError::ConnectTimeout {
            attempts: self.bearer.max_polls,
        })
    }

    /// Assign the bearer address and install the two routes we need
    async fn configure_interface(&self, info: &BearerInfo) -> Result<()> {
        let iface = self.bearer.interface.as_str();
        let address = format!("{}/{}", info.ip, info.prefix);
        let mtu = info.mtu.to_string();
        let network = info.network()?.to_string();
        let gateway = info.gateway.to_string();
        let target = self.target.to_string();

        debug!(
            "Adding IP and routes. Our IP {}, prefix {}, gateway {}",
            info.ip, info.prefix, info.gateway
        );
        self.ip(&["addr", "add", address.as_str(), "dev", iface]).await?;
        self.ip(&["link", "set", "dev", iface, "mtu", mtu.as_str(), "up"]).await?;
        // Gateway is only reachable once its subnet is on-link
        self.ip(&["route", "add", network.as_str(), "dev", iface]).await?;
        self.ip(&["route", "add", target.as_str(), "via", gateway.as_str()]).await?;
        Ok(())
    }
}

#[async_trait]
impl DataBearer for BearerManager {
    async fn connect(&self) -> Result<BearerInfo> {
        debug!("Enabling modem {}", self.modem.modem_index);
        self.mmcli(&self.modem_args(&["-e"])).await?;

        // Usually times out the first time; it still loads the APN into the modem
        debug!("Configuring modem for APN {}", self.bearer.apn);
        let simple_connect = format!("--simple-connect=apn={}", self.bearer.apn);
        if let Err(e) = self.mmcli(&self.modem_args(&[simple_connect.as_str()])).await {
            debug!("Initial modem connection failed, will retry: {}", e);
        }

        let info = self.wait_for_bearer().await?;
        self.configure_interface(&info).await?;
        info!(
            "Bearer up on {}: {}/{} via {} (mtu {})",
            self.bearer.interface, info.ip, info.prefix, info.gateway, info.mtu
        );

        if self.bearer.sync_clock {
            clock::sync_from_network(self.runner.as_ref(), &self.modem).await;
        }

        Ok(info)
    }

    async fn disconnect(&self) {
        let iface = self.bearer.interface.as_str();

        if let Err(e) = self.ip(&["addr", "flush", "dev", iface]).await {
            warn!("Failed to flush addresses on {}: {}", iface, e);
        }
        if let Err(e) = self.ip(&["link", "set", "dev", iface, "down"]).await {
            warn!("Failed to bring {} down: {}", iface, e);
        }
        if let Err(e) = self.mmcli(&self.modem_args(&["--simple-disconnect"])).await {
            warn!("Failed to release bearer on modem {}: {}", self.modem.modem_index, e);
        }
        info!("Bearer down on {}", iface);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use command::mocks::MockCommandRunner;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const CONNECTED: &str = "\
  --------------------------------
  General            |           path: /org/freedesktop/ModemManager1/Bearer/0
                     |           type: default
  --------------------------------
  Status             |      connected: yes
                     |      suspended: no
                     |      interface: wwan0
                     |     ip timeout: 20
  --------------------------------
  Properties         |            apn: hologram
                     |        roaming: allowed
  --------------------------------
  IPv4 configuration |         method: static
                     |        address: 10.170.81.34
                     |         prefix: 30
                     |        gateway: 10.170.81.33
                     |            dns: 8.8.8.8, 8.8.4.4
                     |            mtu: 1430
  --------------------------------
  IPv6 configuration |         method: static
                     |        address: fd00::2
                     |         prefix: 64
                     |        gateway: fd00::1
                     |            mtu: 1280
";

    const DISCONNECTED: &str = "\
  Status             |      connected: no
  IPv4 configuration |         method: unknown
";

    fn modem_config() -> ModemConfig {
        ModemConfig {
            at_port: "/dev/ttyUSB2".to_string(),
            nmea_port: "/dev/ttyUSB1".to_string(),
            baud_rate: 115200,
            response_timeout_ms: 1000,
            reset_delay_ms: 0,
            modem_index: 0,
            inhibit: true,
            mmcli_path: "mmcli".to_string(),
        }
    }

    fn bearer_config(max_polls: u32) -> BearerConfig {
        BearerConfig {
            apn: "hologram".to_string(),
            interface: "wwan0".to_string(),
            bearer_index: 0,
            poll_interval_s: 0,
            max_polls,
            sync_clock: false,
        }
    }

    fn manager(runner: &Arc<MockCommandRunner>, max_polls: u32) -> BearerManager {
        BearerManager::new(
            runner.clone(),
            modem_config(),
            bearer_config(max_polls),
            Ipv4Addr::new(203, 0, 113, 10),
        )
    }

    #[test]
    fn test_parse_connected_bearer() {
        let info = BearerInfo::parse(CONNECTED).unwrap();
        assert_eq!(info.ip, Ipv4Addr::new(10, 170, 81, 34));
        assert_eq!(info.prefix, 30);
        assert_eq!(info.gateway, Ipv4Addr::new(10, 170, 81, 33));
        assert_eq!(info.mtu, 1430);
    }

    #[test]
    fn test_parse_disconnected_bearer() {
        assert!(BearerInfo::parse(DISCONNECTED).is_none());
        assert!(BearerInfo::parse("").is_none());
    }

    #[test]
    fn test_parse_connected_without_ipv4() {
        let output = "  Status             |      connected: yes\n";
        assert!(BearerInfo::parse(output).is_none());
    }

    #[test]
    fn test_network_address() {
        let info = BearerInfo::parse(CONNECTED).unwrap();
        assert_eq!(info.network().unwrap().to_string(), "10.170.81.32/30");
    }

    #[test]
    fn test_network_rejects_bad_prefix() {
        let info = BearerInfo {
            ip: Ipv4Addr::new(10, 0, 0, 1),
            prefix: 40,
            gateway: Ipv4Addr::new(10, 0, 0, 2),
            mtu: 1500,
        };
        assert!(matches!(info.network(), Err(CellscanError::Parse(_))));
    }

    #[tokio::test]
    async fn test_connect_configures_interface_and_host_route() {
        let runner = Arc::new(MockCommandRunner::new());
        runner.fail("--simple-connect");
        runner.respond("mmcli -b 0", || Ok(CONNECTED.to_string()));

        let info = manager(&runner, 10).connect().await.unwrap();
        assert_eq!(info.mtu, 1430);

        let calls = runner.get_calls();
        assert_eq!(
            calls,
            vec![
                "mmcli -m 0 -e".to_string(),
                "mmcli -m 0 --simple-connect=apn=hologram".to_string(),
                "mmcli -b 0".to_string(),
                "ip addr add 10.170.81.34/30 dev wwan0".to_string(),
                "ip link set dev wwan0 mtu 1430 up".to_string(),
                "ip route add 10.170.81.32/30 dev wwan0".to_string(),
                "ip route add 203.0.113.10 via 10.170.81.33".to_string(),
            ]
        );
        assert!(!calls.iter().any(|c| c.contains("default")));
    }

    #[tokio::test]
    async fn test_connect_retries_until_connected() {
        let runner = Arc::new(MockCommandRunner::new());
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        runner.respond("mmcli -b 0 -c", || Ok(String::new()));
        runner.respond("mmcli -b 0", move || {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(DISCONNECTED.to_string())
            } else {
                Ok(CONNECTED.to_string())
            }
        });

        assert!(manager(&runner, 10).connect().await.is_ok());
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert_eq!(runner.count_calls("mmcli -b 0 -c"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out_after_max_polls() {
        let runner = Arc::new(MockCommandRunner::new());
        runner.respond("mmcli -b 0 -c", || Ok(String::new()));
        runner.respond("mmcli -b 0", || Ok(DISCONNECTED.to_string()));

        let mut config = bearer_config(4);
        config.poll_interval_s = 10;
        let manager = BearerManager::new(runner.clone(), modem_config(), config, Ipv4Addr::new(203, 0, 113, 10));

        let started = tokio::time::Instant::now();
        let result = manager.connect().await;

        assert!(matches!(result, Err(CellscanError::ConnectTimeout { attempts: 4 })));
        // No reconnect or wait after the final poll
        assert_eq!(runner.count_calls("mmcli -b 0 -c"), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        assert_eq!(runner.count_calls("ip "), 0);
    }

    #[tokio::test]
    async fn test_connect_fails_when_modem_enable_fails() {
        let runner = Arc::new(MockCommandRunner::new());
        runner.fail("mmcli -m 0 -e");

        let result = manager(&runner, 10).connect().await;
        assert!(matches!(result, Err(CellscanError::ExternalTool { .. })));
        assert_eq!(runner.get_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_fails_when_route_cannot_be_added() {
        let runner = Arc::new(MockCommandRunner::new());
        runner.respond("mmcli -b 0", || Ok(CONNECTED.to_string()));
        runner.fail("ip route add 203.0.113.10");

        let result = manager(&runner, 10).connect().await;
        assert!(matches!(result, Err(CellscanError::ExternalTool { .. })));
    }

    #[tokio::test]
    async fn test_connect_swallows_clock_failure() {
        let runner = Arc::new(MockCommandRunner::new());
        runner.respond("mmcli -b 0", || Ok(CONNECTED.to_string()));
        runner.fail("--time");

        let mut bearer = bearer_config(10);
        bearer.sync_clock = true;
        let manager = BearerManager::new(runner.clone(), modem_config(), bearer, Ipv4Addr::new(203, 0, 113, 10));

        assert!(manager.connect().await.is_ok());
        assert_eq!(runner.count_calls("date"), 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_best_effort() {
        let runner = Arc::new(MockCommandRunner::new());
        runner.fail("ip addr flush");
        runner.fail("ip link set");

        manager(&runner, 10).disconnect().await;

        assert_eq!(
            runner.get_calls(),
            vec![
                "ip addr flush dev wwan0".to_string(),
                "ip link set dev wwan0 down".to_string(),
                "mmcli -m 0 --simple-disconnect".to_string(),
            ]
        );
    }
}
