use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use waste_sorter::config::SorterConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SORTER_CONFIG",
        "SORTER_UPLOAD_DIR",
        "SORTER_API_ADDR",
        "SORTER_SERIAL_PORT",
        "SORTER_BAUD_RATE",
        "SORTER_SERIAL_TIMEOUT_MS",
        "SORTER_RECONNECT_ON_SEND",
        "SORTER_POLL_MS",
        "SORTER_STOP_TIMEOUT_MS",
        "SORTER_WORKERS",
        "SORTER_QUEUE_CAPACITY",
        "SORTER_DEDUP",
        "SORTER_CLASSIFIER_ENDPOINT",
        "SORTER_MODEL",
        "GEMINI_API_KEY",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SorterConfig::load().expect("load config");

    assert_eq!(cfg.upload_dir, PathBuf::from("static/uploads"));
    assert_eq!(cfg.api.addr, "127.0.0.1:5000");
    assert_eq!(cfg.actuator.port, "/dev/ttyUSB0");
    assert_eq!(cfg.actuator.baud_rate, 9600);
    assert_eq!(cfg.actuator.timeout, Duration::from_secs(1));
    assert!(!cfg.processor.reconnect_on_send);
    assert_eq!(cfg.processor.workers, 1);
    assert_eq!(cfg.processor.poll_interval, Duration::from_secs(1));
    assert_eq!(cfg.stop_timeout, Duration::from_secs(5));
    assert_eq!(cfg.queue.capacity, 0);
    assert!(!cfg.queue.dedup);
    assert_eq!(cfg.classifier.model, "gemini-1.5-flash");
    assert!(cfg.classifier.api_key.is_none());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "upload_dir": "/var/lib/sorter/uploads",
            "api": { "addr": "0.0.0.0:8080" },
            "actuator": {
                "port": "/dev/ttyACM0",
                "baud_rate": 115200,
                "timeout_ms": 250,
                "reconnect_on_send": true
            },
            "worker": { "count": 2, "poll_ms": 200, "stop_timeout_ms": 3000 },
            "queue": { "capacity": 16, "enqueue_timeout_ms": 100, "dedup": true },
            "classifier": { "model": "gemini-1.5-pro", "timeout_ms": 10000 }
        }"#,
    );

    std::env::set_var("SORTER_CONFIG", file.path());
    std::env::set_var("SORTER_SERIAL_PORT", "COM3");
    std::env::set_var("SORTER_POLL_MS", "50");
    std::env::set_var("GEMINI_API_KEY", "test-key");

    let cfg = SorterConfig::load().expect("load config");

    assert_eq!(cfg.upload_dir, PathBuf::from("/var/lib/sorter/uploads"));
    assert_eq!(cfg.api.addr, "0.0.0.0:8080");
    assert_eq!(cfg.actuator.port, "COM3");
    assert_eq!(cfg.actuator.baud_rate, 115200);
    assert_eq!(cfg.actuator.timeout, Duration::from_millis(250));
    assert!(cfg.processor.reconnect_on_send);
    assert_eq!(cfg.processor.workers, 2);
    assert_eq!(cfg.processor.poll_interval, Duration::from_millis(50));
    assert_eq!(cfg.stop_timeout, Duration::from_secs(3));
    assert_eq!(cfg.queue.capacity, 16);
    assert_eq!(cfg.queue.enqueue_timeout, Duration::from_millis(100));
    assert!(cfg.queue.dedup);
    assert_eq!(cfg.classifier.model, "gemini-1.5-pro");
    assert_eq!(cfg.classifier.timeout, Duration::from_secs(10));
    assert_eq!(cfg.classifier.api_key.as_deref(), Some("test-key"));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SORTER_BAUD_RATE", "fast");
    assert!(SorterConfig::load().is_err());
    clear_env();

    std::env::set_var("SORTER_WORKERS", "0");
    assert!(SorterConfig::load().is_err());
    clear_env();

    std::env::set_var("SORTER_API_ADDR", "not-an-address");
    assert!(SorterConfig::load().is_err());
    clear_env();

    std::env::set_var("SORTER_SERIAL_TIMEOUT_MS", "0");
    assert!(SorterConfig::load().is_err());
    clear_env();

    let file = write_config(r#"{ "classifier": { "timeout_ms": 0 } }"#);
    std::env::set_var("SORTER_CONFIG", file.path());
    assert!(SorterConfig::load().is_err());
    clear_env();

    let file = write_config(r#"{ "api_key": "must-not-live-in-files" }"#);
    std::env::set_var("SORTER_CONFIG", file.path());
    assert!(SorterConfig::load().is_err());
    clear_env();
}

#[test]
fn reconnect_on_send_reaches_the_processor() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SORTER_RECONNECT_ON_SEND", "true");
    let cfg = SorterConfig::load().expect("load config");
    assert!(cfg.processor.reconnect_on_send);

    clear_env();
}
