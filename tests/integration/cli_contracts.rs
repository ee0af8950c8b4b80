use canopy::config::CanopyConfig;
use canopy::tooling::cli::{CliContext, Commands};
use canopy::CacheEvent;
use std::fs;
use tempfile::TempDir;

const SNAPSHOT: &str = r#"
[[categories]]
id = 1
name = "Technology"

[[categories]]
id = 2
parent_id = 1
name = "Software"

[[categories]]
id = 3
parent_id = 2
name = "Programming"

[[posts]]
id = 10
category_id = 3
created_at_ms = 1714564800000

[[attachments]]
id = 100
post_id = 10
category_id = 3
size = 2048
"#;

fn context(temp_dir: &TempDir) -> CliContext {
    let path = temp_dir.path().join("snapshot.toml");
    fs::write(&path, SNAPSHOT).unwrap();
    CliContext::with_config(&CanopyConfig::default(), Some(&path)).unwrap()
}

#[test]
fn stats_json_contract_has_required_fields() {
    let temp_dir = TempDir::new().unwrap();
    let cli = context(&temp_dir);
    let output = cli
        .execute(&Commands::Stats {
            format: "json".to_string(),
        })
        .unwrap();

    let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(parsed["cache"]["hierarchy"]["nodes"].as_u64(), Some(3));
    assert_eq!(parsed["cache"]["hierarchy"]["max_depth"].as_u64(), Some(2));
    for section in ["post_counts", "activity", "file_stats"] {
        assert_eq!(parsed["cache"][section]["enabled"].as_bool(), Some(true));
        assert!(parsed["cache"][section]["records"].as_u64().is_some());
    }
    assert!(parsed["warmup"]["failures"].as_array().unwrap().is_empty());
}

#[test]
fn files_and_activity_json_contracts() {
    let temp_dir = TempDir::new().unwrap();
    let cli = context(&temp_dir);

    let files = cli
        .execute(&Commands::Files {
            category: 1,
            recursive: true,
            format: "json".to_string(),
        })
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&files).unwrap();
    assert_eq!(parsed["file_count"].as_u64(), Some(1));
    assert_eq!(parsed["total_size"].as_u64(), Some(2048));

    let activity = cli
        .execute(&Commands::Activity {
            category: Some(1),
            recursive: true,
            period: 0,
            months: None,
            start: Some(chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            end: Some(chrono::NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()),
            format: "json".to_string(),
        })
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&activity).unwrap();
    assert_eq!(parsed["stats"]["total_posts"].as_u64(), Some(1));
    assert_eq!(parsed["days"][0]["date"].as_str(), Some("2024-05-01"));
    assert_eq!(parsed["period_start"].as_str(), Some("2024-01-01"));
}

#[test]
fn replay_reports_rejections_and_stays_consistent() {
    let temp_dir = TempDir::new().unwrap();
    let cli = context(&temp_dir);

    let events = vec![
        CacheEvent::CategoryMoved {
            node_id: 3,
            old_parent_id: Some(2),
            new_parent_id: Some(1),
        },
        CacheEvent::FileRemoved {
            node_id: 3,
            file_size: 2048,
        },
        CacheEvent::PostCreated {
            node_id: 42,
            created_at_ms: 0,
        },
    ];
    let log = temp_dir.path().join("events.json");
    fs::write(&log, serde_json::to_string(&events).unwrap()).unwrap();

    let output = cli
        .execute(&Commands::Replay {
            events: log,
            format: "json".to_string(),
        })
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(parsed["replay"]["applied"].as_u64(), Some(2));
    assert_eq!(parsed["replay"]["rejected"][0]["index"].as_u64(), Some(2));
    assert!(parsed["violations"].as_array().unwrap().is_empty());

    let tree = cli
        .execute(&Commands::Tree {
            format: "json".to_string(),
        })
        .unwrap();
    let nodes: serde_json::Value = serde_json::from_str(&tree).unwrap();
    let programming = nodes
        .as_array()
        .unwrap()
        .iter()
        .find(|n| n["id"] == 3)
        .unwrap();
    assert_eq!(programming["depth"].as_u64(), Some(1));
    assert_eq!(programming["parent_id"].as_i64(), Some(1));
}

#[test]
fn missing_snapshot_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("absent.json");
    assert!(CliContext::with_config(&CanopyConfig::default(), Some(&missing)).is_err());
}
