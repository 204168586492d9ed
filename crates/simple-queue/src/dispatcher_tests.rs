//! Tests for event-kind routing and the publisher helpers.

use super::*;
use crate::providers::InMemoryQueue;
use crate::settings::InMemorySettings;
use crate::test_support::{CallLog, MediaMessage, RecordingHandler};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn in_memory_queue() -> Arc<InMemoryQueue<MediaMessage>> {
    let settings = InMemorySettings {
        poll_interval_millis: 10,
    };
    Arc::new(InMemoryQueue::new(settings).unwrap())
}

mod handler_table {
    use super::*;

    #[tokio::test]
    async fn test_each_kind_reaches_only_its_handler() {
        let log = CallLog::default();
        let table = HandlerTable::from_handler(Arc::new(RecordingHandler::new(log.clone())));

        for kind in EventKind::RECOGNIZED {
            let message = MediaMessage::new("1", "payload").with_kind(kind);
            table.dispatch(message).await.unwrap();
        }

        assert_eq!(
            log.entries(),
            vec![
                "handle:Added:payload",
                "handle:Updated:payload",
                "handle:Deleted:payload"
            ]
        );
    }

    #[tokio::test]
    async fn test_unrecognized_kind_invokes_no_handler() {
        let log = CallLog::default();
        let table = HandlerTable::from_handler(Arc::new(RecordingHandler::new(log.clone())));
        let message = MediaMessage::new("1", "mystery").with_kind(EventKind::Unrecognized);

        let result = table.dispatch(message).await;

        assert!(matches!(
            result,
            Err(QueueError::UnsupportedEventKind {
                kind: EventKind::Unrecognized
            })
        ));
        assert!(log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_handler_failure_is_reported_with_kind() {
        let log = CallLog::default();
        let handler = RecordingHandler::new(log.clone()).failing_on("broken");
        let table = HandlerTable::from_handler(Arc::new(handler));
        let message = MediaMessage::new("1", "broken").with_kind(EventKind::Updated);

        let result = table.dispatch(message).await;

        match result {
            Err(QueueError::Handler { kind, message }) => {
                assert_eq!(kind, EventKind::Updated);
                assert!(message.contains("broken"));
            }
            other => panic!("expected handler error, got {:?}", other),
        }
        assert_eq!(log.count("handle:Updated:broken"), 1);
    }
}

mod dispatcher {
    use super::*;

    #[tokio::test]
    async fn test_received_messages_are_routed_by_kind() {
        let log = CallLog::default();
        let queue = in_memory_queue();
        let dispatcher = Dispatcher::new(
            queue.clone() as Arc<dyn MessageQueue<MediaMessage>>,
            Arc::new(RecordingHandler::new(log.clone())),
        );

        dispatcher.start_listening().unwrap();
        let publisher = Publisher::new(queue.clone() as Arc<dyn MessageQueue<MediaMessage>>);
        publisher
            .add_async(&mut MediaMessage::new("1", "a"))
            .await
            .unwrap();
        publisher
            .update_async(&mut MediaMessage::new("1", "b"))
            .await
            .unwrap();
        publisher
            .delete_async(&mut MediaMessage::new("1", "c"))
            .await
            .unwrap();

        assert!(log.wait_for("handle:Deleted:c", WAIT).await);
        dispatcher.stop_listening().await.unwrap();
        assert_eq!(
            log.entries(),
            vec!["handle:Added:a", "handle:Updated:b", "handle:Deleted:c"]
        );
    }

    #[tokio::test]
    async fn test_hello_scenario_observed_once() {
        let log = CallLog::default();
        let queue = in_memory_queue();
        let dispatcher = Dispatcher::new(
            queue.clone() as Arc<dyn MessageQueue<MediaMessage>>,
            Arc::new(RecordingHandler::new(log.clone())),
        );

        queue
            .send_async(&mut MediaMessage::new("1", "hello"), EventKind::Added)
            .await
            .unwrap();
        dispatcher.start_listening().unwrap();

        assert!(log.wait_for("handle:Added:hello", WAIT).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        dispatcher.stop_listening().await.unwrap();
        assert_eq!(log.count("handle:Added:hello"), 1);
    }

    #[tokio::test]
    async fn test_start_listening_twice_is_rejected() {
        let queue = in_memory_queue();
        let dispatcher = Dispatcher::new(
            queue as Arc<dyn MessageQueue<MediaMessage>>,
            Arc::new(RecordingHandler::new(CallLog::default())),
        );

        dispatcher.start_listening().unwrap();
        let second = dispatcher.start_listening();

        assert!(matches!(
            second,
            Err(QueueError::ReceiveAlreadyStarted { .. })
        ));
        dispatcher.stop_listening().await.unwrap();
    }
}

mod publisher {
    use super::*;

    #[test]
    fn test_sync_helpers_stamp_kind() {
        let queue = in_memory_queue();
        let publisher = Publisher::new(queue.clone() as Arc<dyn MessageQueue<MediaMessage>>);

        let mut added = MediaMessage::new("1", "a").with_kind(EventKind::Deleted);
        let mut updated = MediaMessage::new("2", "b");
        let mut deleted = MediaMessage::new("3", "c");
        publisher.add(&mut added).unwrap();
        publisher.update(&mut updated).unwrap();
        publisher.delete(&mut deleted).unwrap();

        assert_eq!(added.event_kind, EventKind::Added);
        assert_eq!(updated.event_kind, EventKind::Updated);
        assert_eq!(deleted.event_kind, EventKind::Deleted);
        assert_eq!(queue.len(), 3);
    }

    #[tokio::test]
    async fn test_sync_helper_on_current_thread_runtime_is_refused() {
        let queue = in_memory_queue();
        let publisher = Publisher::new(queue.clone() as Arc<dyn MessageQueue<MediaMessage>>);

        let result = publisher.add(&mut MediaMessage::new("1", "a"));

        assert!(matches!(result, Err(QueueError::BlockingUnsupported)));
        assert!(queue.is_empty());
    }
}
