//! Tests for error types.

use super::*;

#[test]
fn test_error_transience() {
    assert!(QueueError::transient("kafka", "broker unreachable").is_transient());

    assert!(!QueueError::permanent("sqs", "access denied").is_transient());

    assert!(!QueueError::ConnectionClosed {
        queue_name: "MediaMessage".to_string(),
    }
    .is_transient());

    assert!(!QueueError::UnsupportedEventKind {
        kind: EventKind::Unrecognized,
    }
    .is_transient());

    assert!(!QueueError::ConfigurationError(ConfigurationError::Missing {
        key: "rabbitmq.uri".to_string(),
    })
    .is_transient());
}

#[test]
fn test_retry_suggestions() {
    let transient = QueueError::transient("rabbitmq", "channel flow paused");
    assert_eq!(transient.retry_after(), Some(Duration::from_secs(1)));
    assert!(transient.should_retry());

    let closed = QueueError::ConnectionClosed {
        queue_name: "test".to_string(),
    };
    assert_eq!(closed.retry_after(), None);
    assert!(!closed.should_retry());
}

#[test]
fn test_error_messages_name_the_backend() {
    let err = QueueError::permanent("sqs", "queue does not exist");
    assert_eq!(
        err.to_string(),
        "Transport error (sqs): queue does not exist"
    );

    let err = QueueError::Handler {
        kind: EventKind::Deleted,
        message: "row already gone".to_string(),
    };
    assert_eq!(
        err.to_string(),
        "Handler for Deleted messages failed: row already gone"
    );
}

#[test]
fn test_backend_disabled_message_names_feature() {
    let err = ConfigurationError::BackendDisabled {
        backend: "kafka".to_string(),
        feature: "kafka".to_string(),
    };
    assert!(err.to_string().contains("enable the 'kafka' feature"));
}
