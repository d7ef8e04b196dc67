//! Tests for logging configuration and format parsing
//!
//! Tests the pure functions in the logging module that handle
//! log format parsing and configuration from environment variables.

use tracing::Level;
use uplink::observability::logging::{parse_level, parse_spans_flag, LogFormat};
use uplink::observability::{DiagnosticSink, TracingSink};
use uplink::testing::MemorySink;

#[test]
fn test_log_format_parse_json() {
    assert!(matches!(LogFormat::parse("json"), LogFormat::Json));
    assert!(matches!(LogFormat::parse("JSON"), LogFormat::Json));
    assert!(matches!(LogFormat::parse("Json"), LogFormat::Json));
}

#[test]
fn test_log_format_parse_pretty() {
    assert!(matches!(LogFormat::parse("pretty"), LogFormat::Pretty));
    assert!(matches!(LogFormat::parse("PRETTY"), LogFormat::Pretty));
}

#[test]
fn test_log_format_parse_compact() {
    assert!(matches!(LogFormat::parse("compact"), LogFormat::Compact));
    assert!(matches!(LogFormat::parse("Compact"), LogFormat::Compact));
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    // Unknown formats fall back to JSON for deployed devices
    assert!(matches!(LogFormat::parse("invalid"), LogFormat::Json));
    assert!(matches!(LogFormat::parse(""), LogFormat::Json));
    assert!(matches!(LogFormat::parse("xml"), LogFormat::Json));
}

#[test]
fn test_log_format_parse_whitespace() {
    assert!(matches!(LogFormat::parse("  json  "), LogFormat::Json));
    assert!(matches!(LogFormat::parse("compact\n"), LogFormat::Compact));
    assert!(matches!(LogFormat::parse("\tpretty"), LogFormat::Pretty));
}

#[test]
fn test_log_level_parsing() {
    assert_eq!(parse_level("ERROR"), Level::ERROR);
    assert_eq!(parse_level("warn"), Level::WARN);
    assert_eq!(parse_level(" debug "), Level::DEBUG);
    assert_eq!(parse_level("TRACE"), Level::TRACE);
    assert_eq!(parse_level("verbose"), Level::INFO);
    assert_eq!(parse_level(""), Level::INFO);
}

#[test]
fn test_log_spans_parsing() {
    let test_cases = vec![
        ("true", true),
        ("TRUE", true),
        ("True", true),
        ("false", false),
        ("", false),
        ("yes", false),
        ("1", false),
    ];

    for (input, expected) in test_cases {
        assert_eq!(parse_spans_flag(input), expected, "Failed for input: {input}");
    }
}

#[test]
fn test_memory_sink_captures_records() {
    let sink = MemorySink::new();
    sink.record(Level::INFO, "link", "idle -> associating retries=0/5");
    sink.record(Level::WARN, "session", "transport error: reset");

    let records = sink.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].tag, "link");
    assert_eq!(records[1].level, Level::WARN);
    assert_eq!(sink.messages("session"), vec!["transport error: reset"]);
    assert!(sink.contains("link", "associating"));
    assert!(!sink.contains("session", "associating"));
}

#[test]
fn test_tracing_sink_without_subscriber() {
    // Recording with no global subscriber installed must be a silent no-op
    TracingSink.record(Level::ERROR, "link", "link failed after 5 retries");
}
