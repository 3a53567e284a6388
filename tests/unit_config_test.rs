use iolitedb::config::{Config, MemoryLimitConfig};
use std::time::Duration;

fn write_temp_config(name: &str, contents: &str) -> String {
    let path = std::env::temp_dir().join(format!("iolitedb-test-{name}-{}.toml", std::process::id()));
    std::fs::write(&path, contents).expect("config fixture must be writable");
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.cluster_info.update_interval, Duration::from_secs(30));
    assert_eq!(config.cluster_info.update_timeout, Duration::from_secs(15));
    assert!(config.allocation.disk_threshold_enabled);
    assert_eq!(config.allocation.low_disk_watermark_ratio, 0.85);
    assert_eq!(config.allocation.high_disk_watermark_ratio, 0.90);
    assert_eq!(config.allocation.node_concurrent_incoming_recoveries, 2);
    assert_eq!(config.allocation.balancer.max_iterations, 1000);
    assert_eq!(config.write_queue_size, 10_000);
}

#[tokio::test]
async fn test_from_file_clamps_short_info_interval() {
    let path = write_temp_config(
        "clamp",
        r#"
[cluster_info]
update_interval = "2s"
update_timeout = "5s"
"#,
    );
    let config = Config::from_file(&path).expect("config must load");
    std::fs::remove_file(&path).ok();
    assert_eq!(config.cluster_info.update_interval, Duration::from_secs(10));
    assert_eq!(config.cluster_info.update_timeout, Duration::from_secs(5));
}

#[tokio::test]
async fn test_invalid_watermarks_are_rejected() {
    let path = write_temp_config(
        "watermark",
        r#"
[allocation]
low_disk_watermark_ratio = 0.95
high_disk_watermark_ratio = 0.80
"#,
    );
    let result = Config::from_file(&path);
    std::fs::remove_file(&path).ok();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_memory_limit_resolution() {
    let mut config = Config::default();
    config.indexing_pressure.memory_limit = MemoryLimitConfig::Bytes(4096);
    assert_eq!(config.resolve_indexing_pressure_limit().unwrap(), 4096);

    config.indexing_pressure.memory_limit = MemoryLimitConfig::String("10%".to_string());
    let ten_percent = config.resolve_indexing_pressure_limit().unwrap();
    assert!(ten_percent > 0);

    config.indexing_pressure.memory_limit = MemoryLimitConfig::String("50%".to_string());
    let fifty_percent = config.resolve_indexing_pressure_limit().unwrap();
    assert!(fifty_percent > ten_percent);

    config.indexing_pressure.memory_limit = MemoryLimitConfig::String("150%".to_string());
    assert!(config.resolve_indexing_pressure_limit().is_err());

    config.indexing_pressure.memory_limit = MemoryLimitConfig::String("lots".to_string());
    assert!(config.resolve_indexing_pressure_limit().is_err());
}

#[tokio::test]
async fn test_unbounded_write_queue_is_allowed() {
    let path = write_temp_config("queue", "write_queue_size = -1\n");
    let config = Config::from_file(&path).expect("config must load");
    std::fs::remove_file(&path).ok();
    assert_eq!(config.write_queue_size, -1);

    let path = write_temp_config("queue-bad", "write_queue_size = -2\n");
    let result = Config::from_file(&path);
    std::fs::remove_file(&path).ok();
    assert!(result.is_err());
}
