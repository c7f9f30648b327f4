//! End-to-end tests for the replay pipeline: JSON lines in, command lines
//! and a projection document out. No file or terminal is touched.

use std::time::Duration;

use serde_json::Value;

use evohub_app::config::EngineConfig;
use evohub_domain::schema::SystemSchema;
use evohubd::replay::{Replay, Summary};

const CTL: &str = "01:145038";

const TRAFFIC: &str = r#"
{"code":"1F09","verb":"I","src":"01:145038","payload":{"type":"system_sync","remaining_seconds":300.0},"timestamp":"2024-01-01T12:00:00Z"}
{"code":"30C9","verb":"I","src":"01:145038","payload":{"type":"zone_temperatures","zones":[{"zone_idx":"00","temperature":19.0},{"zone_idx":"01","temperature":21.0}]},"timestamp":"2024-01-01T12:00:00Z"}
{"code":"30C9","verb":"I","src":"34:092243","payload":{"type":"temperature","temperature":20.5},"timestamp":"2024-01-01T12:01:40Z"}
{"code":"30C9","verb":"I","src":"01:145038","payload":{"type":"zone_temperatures","zones":[{"zone_idx":"00","temperature":19.0},{"zone_idx":"01","temperature":20.5}]},"timestamp":"2024-01-01T12:03:00Z"}
{"code":"10A0","verb":"RP","src":"01:145038","dst":"07:045960","payload":{"type":"dhw_params","setpoint":55.0,"overrun":0,"differential":10.0},"timestamp":"2024-01-01T12:03:10Z"}
"#;

const HOUR: Duration = Duration::from_secs(3600);

async fn replay(config: EngineConfig, input: &str) -> (Summary, Vec<Value>) {
    let mut replay = Replay::new(config, 256, Vec::new());
    replay
        .run(input.as_bytes(), HOUR, std::future::pending())
        .await
        .unwrap();
    let (summary, output) = replay.finish().await.unwrap();
    let lines = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    (summary, lines)
}

#[tokio::test]
async fn should_learn_topology_from_replayed_traffic() {
    let (summary, lines) = replay(EngineConfig::default(), TRAFFIC).await;

    assert_eq!(summary.messages, 5);
    assert_eq!(summary.rejected, 0);
    let system = &lines.last().unwrap()["systems"][CTL];
    assert_eq!(system["schema"]["zones"]["01"]["sensor"], "34:092243");
    assert_eq!(system["schema"]["zones"]["00"]["sensor"], Value::Null);
    assert_eq!(system["schema"]["stored_hotwater"]["sensor"], "07:045960");
}

#[tokio::test]
async fn should_write_discovery_commands_before_projections() {
    let (summary, lines) = replay(EngineConfig::default(), TRAFFIC).await;

    let commands = &lines[..lines.len() - 1];
    assert_eq!(commands.len(), summary.commands);
    assert!(commands.iter().all(|c| c["command"]["dst"] == CTL));
    assert!(commands.iter().any(|c| c["command"]["code"] == "0005"));
}

#[tokio::test]
async fn should_write_no_commands_when_discovery_disabled() {
    let config = EngineConfig {
        disable_discovery: true,
        ..EngineConfig::default()
    };
    let (summary, lines) = replay(config, TRAFFIC).await;

    assert_eq!(summary.commands, 0);
    assert_eq!(lines.len(), 1);
}

#[tokio::test]
async fn should_skip_undecodable_lines() {
    let input = format!("not json\n{{\"code\":\"30C9\"}}\n{TRAFFIC}");

    let (summary, _) = replay(EngineConfig::default(), &input).await;

    assert_eq!(summary.rejected, 2);
    assert_eq!(summary.messages, 5);
}

#[tokio::test(start_paused = true)]
async fn should_stop_when_shutdown_completes() {
    let (_writer, reader) = tokio::io::duplex(64);
    let mut replay = Replay::new(EngineConfig::default(), 256, Vec::new());

    replay
        .run(
            tokio::io::BufReader::new(reader),
            HOUR,
            tokio::time::sleep(Duration::from_secs(1)),
        )
        .await
        .unwrap();

    let (summary, output) = replay.finish().await.unwrap();
    assert_eq!(summary, Summary::default());
    let snapshot: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(snapshot["systems"], serde_json::json!({}));
}

#[tokio::test]
async fn should_apply_configured_schemas_before_traffic() {
    let mut schema = SystemSchema::new(CTL.parse().unwrap());
    schema.htg_control = Some("13:237335".parse().unwrap());
    let mut replay = Replay::new(EngineConfig::default(), 256, Vec::new());

    replay.apply_schemas(&[schema]).unwrap();

    let system = replay.registry().system(CTL.parse().unwrap()).unwrap();
    assert_eq!(system.htg_control(), Some("13:237335".parse().unwrap()));
}
