//! Best-effort system clock sync from modem-reported network time

use chrono::{DateTime, FixedOffset};
use tracing::{info, warn};

use super::command::CommandRunner;
use crate::config::ModemConfig;
use crate::error::{CellscanError, Result};

/// Program used to set the system clock
const DATE: &str = "date";

/// Extract the `current:` timestamp from `mmcli -m <n> --time` output
///
/// ```text
///   Time |              current: 2024-03-09T18:22:41-08:00
///        |             timezone: -480
/// ```
pub fn parse_network_time(output: &str) -> Result<DateTime<FixedOffset>> {
    let value = output
        .lines()
        .filter_map(|line| line.split_once('|').map(|(_, right)| right).or(Some(line)))
        .filter_map(|field| field.split_once(':'))
        .find(|(key, _)| key.trim() == "current")
        .map(|(_, value)| value.trim())
        .ok_or_else(|| CellscanError::Parse("no current time in modem output".to_string()))?;

    DateTime::parse_from_rfc3339(value)
        .map_err(|e| CellscanError::Parse(format!("bad modem time {:?}: {}", value, e)))
}

async fn try_sync(runner: &dyn CommandRunner, modem: &ModemConfig) -> Result<DateTime<FixedOffset>> {
    let args = vec!["-m".to_string(), modem.modem_index.to_string(), "--time".to_string()];
    let output = runner.run(&modem.mmcli_path, &args).await?;
    let now = parse_network_time(&output)?;

    let set = vec!["-u".to_string(), "-s".to_string(), format!("@{}", now.timestamp())];
    runner.run(DATE, &set).await?;
    Ok(now)
}

/// Set the system clock from the modem's network time
///
/// Observations do not depend on the system clock being right, so every
/// failure here is logged and dropped.
pub async fn sync_from_network(runner: &dyn CommandRunner, modem: &ModemConfig) {
    match try_sync(runner, modem).await {
        Ok(now) => info!("System clock set from network time: {}", now.to_rfc3339()),
        Err(e) => warn!("Clock sync skipped: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bearer::command::mocks::MockCommandRunner;

    const TIME_OUTPUT: &str = "\
  --------------------------
  Time |              current: 2024-03-09T18:22:41-08:00
       |             timezone: -480
       |  daylight savings time: 0
";

    fn modem_config() -> ModemConfig {
        ModemConfig {
            at_port: "/dev/ttyUSB2".to_string(),
            nmea_port: "/dev/ttyUSB1".to_string(),
            baud_rate: 115200,
            response_timeout_ms: 1000,
            reset_delay_ms: 0,
            modem_index: 1,
            inhibit: true,
            mmcli_path: "mmcli".to_string(),
        }
    }

    #[test]
    fn test_parse_network_time() {
        let time = parse_network_time(TIME_OUTPUT).unwrap();
        assert_eq!(time.timestamp(), 1710037361);
    }

    #[test]
    fn test_parse_missing_time() {
        assert!(matches!(
            parse_network_time("  Time |  timezone: -480\n"),
            Err(CellscanError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_garbage_time() {
        assert!(parse_network_time("  Time | current: yesterday\n").is_err());
    }

    #[tokio::test]
    async fn test_sync_sets_clock() {
        let runner = MockCommandRunner::new();
        runner.respond("--time", || Ok(TIME_OUTPUT.to_string()));

        sync_from_network(&runner, &modem_config()).await;

        assert_eq!(
            runner.get_calls(),
            vec!["mmcli -m 1 --time".to_string(), "date -u -s @1710037361".to_string()]
        );
    }

    #[tokio::test]
    async fn test_sync_swallows_bad_output() {
        let runner = MockCommandRunner::new();
        runner.respond("--time", || Ok("no time here".to_string()));

        sync_from_network(&runner, &modem_config()).await;
        assert_eq!(runner.count_calls("date"), 0);
    }

    #[tokio::test]
    async fn test_sync_swallows_date_failure() {
        let runner = MockCommandRunner::new();
        runner.respond("--time", || Ok(TIME_OUTPUT.to_string()));
        runner.fail("date");

        sync_from_network(&runner, &modem_config()).await;
        assert_eq!(runner.count_calls("date"), 1);
    }
}
