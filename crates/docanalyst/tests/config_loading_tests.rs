//! Table-driven tests for configuration loading and validation.

use docanalyst::config::{load_config, load_config_from_str, BackoffKind, LogFormat};
use docanalyst::scheduler::SchedulerConfig;

/// Represents a single config loading test case.
struct ConfigTestCase {
    name: &'static str,
    config_json: &'static str,
    should_succeed: bool,
    /// Expected error substring (if should_succeed is false).
    expected_error: Option<&'static str>,
}

const CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "valid_minimal",
        config_json: r#"{ "version": "1.0", "artifact_directory": "/tmp/uploads" }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_full",
        config_json: r#"{
            "version": "1.0",
            "database_path": "/var/lib/docanalyst/jobs.db",
            "artifact_directory": "/var/lib/docanalyst/uploads",
            "worker_count": 4,
            "default_query": "Summarize the filing",
            "accepted_mime_types": ["application/pdf", "text/plain"],
            "retry": { "max_attempts": 5, "backoff": "exponential", "backoff_secs": 2, "max_backoff_secs": 60 },
            "timeouts": { "soft_secs": 120, "hard_secs": 150 },
            "watchdog": { "interval_secs": 10, "grace_secs": 5 },
            "reasoning": {
                "endpoint": "http://localhost:11434/v1",
                "model": "llama3",
                "api_key_env": "LOCAL_LLM_KEY",
                "request_timeout_secs": 90,
                "max_document_chars": 50000,
                "temperature": 0.0
            },
            "logging": { "level": "docanalyst=debug", "format": "json" }
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "missing_artifact_directory",
        config_json: r#"{ "version": "1.0" }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "unknown_field",
        config_json: r#"{ "version": "1.0", "artifact_directory": "/tmp", "ocr": {} }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "zero_attempts",
        config_json: r#"{ "version": "1.0", "artifact_directory": "/tmp", "retry": { "max_attempts": 0 } }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "hard_below_soft",
        config_json: r#"{ "version": "1.0", "artifact_directory": "/tmp", "timeouts": { "soft_secs": 300, "hard_secs": 60 } }"#,
        should_succeed: false,
        expected_error: Some("hard_secs"),
    },
    ConfigTestCase {
        name: "unsupported_version",
        config_json: r#"{ "version": "2.0", "artifact_directory": "/tmp" }"#,
        should_succeed: false,
        expected_error: Some("Unsupported config version"),
    },
    ConfigTestCase {
        name: "blank_default_query",
        config_json: r#"{ "version": "1.0", "artifact_directory": "/tmp", "default_query": "   " }"#,
        should_succeed: false,
        expected_error: Some("default_query"),
    },
    ConfigTestCase {
        name: "invalid_json",
        config_json: r#"{ "version": "1.0", "#,
        should_succeed: false,
        expected_error: Some("Failed to parse config JSON"),
    },
];

#[test]
fn test_config_loading_table() {
    for case in CONFIG_TESTS {
        let result = load_config_from_str(case.config_json);

        if case.should_succeed {
            assert!(
                result.is_ok(),
                "{}: expected success, got {:?}",
                case.name,
                result.err()
            );
        } else {
            let err = match result {
                Ok(_) => panic!("{}: expected failure", case.name),
                Err(e) => e.to_string(),
            };
            if let Some(expected) = case.expected_error {
                assert!(
                    err.contains(expected),
                    "{}: expected error containing '{}', got '{}'",
                    case.name,
                    expected,
                    err
                );
            }
        }
    }
}

#[test]
fn test_full_config_maps_to_scheduler_config() {
    let config = load_config_from_str(CONFIG_TESTS[1].config_json).unwrap();
    assert_eq!(config.retry.backoff, BackoffKind::Exponential);
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.reasoning.model, "llama3");

    let scheduler = SchedulerConfig::from_config(&config);
    assert_eq!(scheduler.worker_count, 4);
    assert_eq!(scheduler.retry.max_attempts, 5);
    assert_eq!(scheduler.default_query, "Summarize the filing");
    assert_eq!(scheduler.retry.delay_for(3), std::time::Duration::from_secs(8));
}

#[test]
fn test_load_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docanalyst.json");
    std::fs::write(&path, CONFIG_TESTS[0].config_json).unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.artifact_directory, "/tmp/uploads");

    let missing = load_config(dir.path().join("missing.json")).unwrap_err();
    assert!(missing.to_string().contains("Failed to read config file"));
}
