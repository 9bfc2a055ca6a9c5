//! Harness lifecycle tests against the mock transport
//!
//! Time is paused in every test, so intervals and drain bounds are exact and
//! cost nothing.

use mqtt_harness::config::HarnessConfig;
use mqtt_harness::error::{ErrorKind, HarnessError};
use mqtt_harness::harness::{Harness, HarnessState, RunSummary};
use mqtt_harness::protocol::{
    DEFAULT_HUMIDITY_TOPIC, DEFAULT_MOTION_TOPIC, DEFAULT_STATUS_TOPIC, DEFAULT_TEMPERATURE_TOPIC,
};
use mqtt_harness::reporter::{HarnessEvent, PublishOutcome};
use mqtt_harness::testing::{MockTransport, RecordingReporter};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const TOPIC_ORDER: [&str; 4] = [
    DEFAULT_TEMPERATURE_TOPIC,
    DEFAULT_HUMIDITY_TOPIC,
    DEFAULT_MOTION_TOPIC,
    DEFAULT_STATUS_TOPIC,
];

fn config(rounds: u32, interval_secs: u64, max_drain_secs: Option<u64>) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.run.publish_rounds = rounds;
    config.run.publish_interval_secs = interval_secs;
    config.run.max_drain_secs = max_drain_secs;
    config
}

fn harness(
    config: HarnessConfig,
    transport: &MockTransport,
) -> (Harness<MockTransport>, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::new());
    let harness = Harness::new(config, transport.clone(), reporter.clone()).unwrap();
    (harness, reporter)
}

type RunHandle = JoinHandle<(Result<RunSummary, HarnessError>, Harness<MockTransport>)>;

fn spawn_run(mut harness: Harness<MockTransport>) -> RunHandle {
    tokio::spawn(async move {
        let result = harness.run().await;
        (result, harness)
    })
}

#[tokio::test(start_paused = true)]
async fn test_two_rounds_publish_eight_messages_in_order() {
    let transport = MockTransport::new();
    let (mut harness, _reporter) = harness(config(2, 2, Some(1)), &transport);

    let summary = harness.run().await.unwrap();

    let published = transport.published();
    assert_eq!(published.len(), 8);
    for (i, (topic, _, _)) in published.iter().enumerate() {
        assert_eq!(topic, TOPIC_ORDER[i % 4], "publish #{i} went to the wrong topic");
    }

    let gap = published[4].2 - published[3].2;
    assert!(gap >= Duration::from_secs(2), "rounds only {gap:?} apart");

    assert_eq!(summary.rounds_completed, 2);
    assert_eq!(summary.publishes_ok, 8);
    assert_eq!(summary.publishes_failed, 0);
    assert_eq!(harness.state(), HarnessState::Stopped);
    assert_eq!(transport.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_sleep_after_last_round() {
    let transport = MockTransport::new();
    let (mut harness, _reporter) = harness(config(3, 10, Some(0)), &transport);

    let started = Instant::now();
    harness.run().await.unwrap();

    // Two intervals between three rounds, none after the last one
    assert!(started.elapsed() < Duration::from_secs(21));
    assert!(started.elapsed() >= Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn test_payloads_match_wire_format() {
    let transport = MockTransport::new();
    let (mut harness, _reporter) = harness(config(1, 2, Some(0)), &transport);
    harness.run().await.unwrap();

    let published = transport.published();
    let json = |i: usize| serde_json::from_slice::<serde_json::Value>(&published[i].1).unwrap();

    let temperature = json(0);
    assert_eq!(temperature["unita"], "°C");
    let value = temperature["valore"].as_f64().unwrap();
    assert!((18.0..=28.0).contains(&value));

    let humidity = json(1);
    assert_eq!(humidity["unita"], "%");
    assert!(humidity["valore"].is_u64());

    assert!(json(2)["movimento_rilevato"].is_boolean());

    let status = json(3);
    assert_eq!(status["online"], true);
    assert!(chrono::DateTime::parse_from_rfc3339(status["timestamp"].as_str().unwrap()).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_refused_connection_fails_without_traffic() {
    let transport = MockTransport::new().with_connect_code(5);
    let (mut harness, reporter) = harness(config(10, 2, None), &transport);

    let err = harness.run().await.unwrap_err();

    assert!(matches!(err, HarnessError::Connect { code: Some(5), .. }));
    assert!(err.is_fatal());
    assert_eq!(harness.state(), HarnessState::Failed);
    assert_eq!(transport.subscribe_count(), 0);
    assert_eq!(transport.publish_count(), 0);

    let errors = reporter.errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        HarnessEvent::Error {
            kind: ErrorKind::Connect,
            topic: None,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_connect_error_fails_run() {
    let transport = MockTransport::with_connect_failure();
    let (mut harness, reporter) = harness(config(10, 2, None), &transport);

    let err = harness.run().await.unwrap_err();

    assert!(matches!(err, HarnessError::Connect { code: None, .. }));
    assert_eq!(harness.state(), HarnessState::Failed);
    assert_eq!(transport.subscribe_count(), 0);
    assert_eq!(reporter.errors().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_after_failure_stays_failed() {
    let transport = MockTransport::new().with_connect_code(4);
    let (mut harness, _reporter) = harness(config(1, 2, None), &transport);

    assert!(harness.run().await.is_err());
    harness.stop().await.unwrap();

    assert_eq!(harness.state(), HarnessState::Failed);
    assert_eq!(transport.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_subscribe_does_not_stop_batch() {
    let transport = MockTransport::new().with_failing_subscription(DEFAULT_HUMIDITY_TOPIC);
    let (mut harness, reporter) = harness(config(1, 2, Some(0)), &transport);

    let summary = harness.run().await.unwrap();

    assert_eq!(transport.subscribe_count(), 4);
    assert_eq!(
        transport.subscribed_topics(),
        vec![
            DEFAULT_TEMPERATURE_TOPIC,
            DEFAULT_MOTION_TOPIC,
            DEFAULT_STATUS_TOPIC
        ]
    );
    assert_eq!(summary.subscriptions_failed, 1);
    assert_eq!(transport.publish_count(), 4);

    let errors = reporter.errors();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        HarnessEvent::Error { kind, topic, .. } => {
            assert_eq!(*kind, ErrorKind::Subscribe);
            assert_eq!(topic.as_deref(), Some(DEFAULT_HUMIDITY_TOPIC));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_publish_does_not_abort_round() {
    let transport = MockTransport::new().with_failing_publish(DEFAULT_TEMPERATURE_TOPIC);
    let (mut harness, reporter) = harness(config(2, 1, Some(0)), &transport);

    let summary = harness.run().await.unwrap();

    assert_eq!(transport.publish_count(), 8);
    assert_eq!(summary.publishes_ok, 6);
    assert_eq!(summary.publishes_failed, 2);

    let failures = reporter.filter(|event| {
        matches!(
            event,
            HarnessEvent::PublishResult {
                outcome: PublishOutcome::Failed { .. },
                ..
            }
        )
    });
    assert_eq!(failures.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_interval_sleep_ends_loop() {
    let transport = MockTransport::new();
    let (harness, reporter) = harness(config(10, 2, None), &transport);
    let stop = harness.stop_handle();

    let started = Instant::now();
    let run = spawn_run(harness);

    tokio::time::sleep(Duration::from_secs(3)).await;
    stop.request_stop();

    let (result, harness) = run.await.unwrap();
    let summary = result.unwrap();

    // Stopped within the second sleep, before round three was due at t=4
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(summary.rounds_completed, 2);
    assert_eq!(transport.publish_count(), 8);
    assert_eq!(harness.state(), HarnessState::Stopped);
    assert!(reporter
        .events()
        .iter()
        .any(|event| matches!(event, HarnessEvent::Interrupted)));
}

#[tokio::test(start_paused = true)]
async fn test_stop_twice_disconnects_once() {
    let transport = MockTransport::new();
    let (mut harness, _reporter) = harness(config(1, 2, Some(0)), &transport);

    harness.run().await.unwrap();
    assert_eq!(harness.state(), HarnessState::Stopped);

    harness.stop().await.unwrap();
    assert_eq!(harness.state(), HarnessState::Stopped);
    assert_eq!(transport.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_publish_rejected_while_disconnected() {
    let transport = MockTransport::new();
    let (mut harness, reporter) = harness(config(2, 2, Some(1)), &transport);

    harness.start().await.unwrap();
    transport.drop_connection();

    let err = harness.publish_all_rounds().await.unwrap_err();
    assert!(err.is_fatal());

    // Every publish of the round was refused before reaching the transport
    assert_eq!(transport.publish_count(), 0);
    let summary = harness.summary();
    assert_eq!(summary.publishes_failed, 4);
    assert_eq!(summary.rounds_completed, 1);
    assert_eq!(harness.state(), HarnessState::Failed);

    let rejected = reporter.filter(|event| match event {
        HarnessEvent::PublishResult {
            outcome: PublishOutcome::Failed { cause },
            ..
        } => cause.contains("Not connected"),
        _ => false,
    });
    assert_eq!(rejected.len(), 4);
}

fn connect_errors(reporter: &RecordingReporter) -> Vec<String> {
    reporter
        .errors()
        .into_iter()
        .filter_map(|event| match event {
            HarnessEvent::Error {
                kind: ErrorKind::Connect,
                cause,
                ..
            } => Some(cause),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_connection_loss_while_publishing_fails_run() {
    let transport = MockTransport::new();
    let (harness, reporter) = harness(config(5, 2, None), &transport);
    let run = spawn_run(harness);

    tokio::time::sleep(Duration::from_secs(1)).await;
    transport.drop_connection();

    let (result, harness) = tokio::time::timeout(Duration::from_secs(60), run)
        .await
        .expect("run should end once the session is lost")
        .unwrap();

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connect);
    assert!(err.is_fatal());
    assert_eq!(harness.state(), HarnessState::Failed);

    // Lost during the first interval: no further rounds were attempted
    assert_eq!(transport.publish_count(), 4);
    assert_eq!(harness.summary().rounds_completed, 1);
    assert_eq!(transport.disconnect_count(), 1);

    let causes = connect_errors(&reporter);
    assert_eq!(causes.len(), 1);
    assert!(causes[0].contains("lost"), "got: {}", causes[0]);

    let events = reporter.events();
    assert!(events.iter().any(|e| matches!(e, HarnessEvent::Disconnected)));
    assert!(!events.iter().any(|e| matches!(e, HarnessEvent::Interrupted)));
    assert!(matches!(events.last(), Some(HarnessEvent::Finished(_))));
}

#[tokio::test(start_paused = true)]
async fn test_connection_loss_ends_unbounded_drain() {
    let transport = MockTransport::new();
    let (harness, reporter) = harness(config(1, 1, None), &transport);
    let run = spawn_run(harness);

    tokio::time::sleep(Duration::from_secs(1)).await;
    transport.drop_connection();

    let (result, harness) = tokio::time::timeout(Duration::from_secs(3600), run)
        .await
        .expect("drain should end once the session is lost")
        .unwrap();

    assert!(matches!(result, Err(HarnessError::Connect { .. })));
    assert_eq!(harness.state(), HarnessState::Failed);
    assert_eq!(transport.publish_count(), 4);
    assert_eq!(connect_errors(&reporter).len(), 1);
    assert!(reporter
        .events()
        .iter()
        .any(|event| matches!(event, HarnessEvent::Draining { max_drain_secs: None })));
}

#[tokio::test(start_paused = true)]
async fn test_broker_refused_subscription_is_reported() {
    let transport = MockTransport::new().with_refused_subscription(DEFAULT_MOTION_TOPIC);
    let (mut harness, reporter) = harness(config(1, 1, Some(1)), &transport);

    let summary = harness.run().await.unwrap();

    assert_eq!(summary.subscriptions_failed, 1);
    let errors = reporter.errors();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        HarnessEvent::Error { kind, topic, cause } => {
            assert_eq!(*kind, ErrorKind::Subscribe);
            assert_eq!(topic.as_deref(), Some(DEFAULT_MOTION_TOPIC));
            assert!(cause.contains("refused"), "got: {cause}");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_echoed_messages_are_reported() {
    let transport = MockTransport::new().with_echo();
    let (mut harness, reporter) = harness(config(1, 2, Some(1)), &transport);

    let summary = harness.run().await.unwrap();

    assert_eq!(summary.messages_received, 4);
    let received = reporter.filter(|event| matches!(event, HarnessEvent::MessageReceived { .. }));
    assert_eq!(received.len(), 4);
    match &received[0] {
        HarnessEvent::MessageReceived { topic, payload, .. } => {
            assert_eq!(topic, DEFAULT_TEMPERATURE_TOPIC);
            assert!(payload.contains("\"valore\""));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_message_is_reported_and_dropped() {
    let transport = MockTransport::new();
    let (harness, reporter) = harness(config(1, 2, Some(5)), &transport);
    let run = spawn_run(harness);

    tokio::time::sleep(Duration::from_secs(1)).await;
    transport.inject_message(DEFAULT_STATUS_TOPIC, &[0xff, 0xfe, 0x00]);
    transport.inject_message(DEFAULT_STATUS_TOPIC, br#"{"online": true}"#);

    let (result, _harness) = run.await.unwrap();
    let summary = result.unwrap();

    assert_eq!(summary.messages_received, 2);
    assert_eq!(summary.decode_errors, 1);

    let errors = reporter.errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        HarnessEvent::Error {
            kind: ErrorKind::MessageDecode,
            ..
        }
    ));
    assert_eq!(
        reporter
            .filter(|event| matches!(event, HarnessEvent::MessageReceived { .. }))
            .len(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_drain_bounded_by_max_drain() {
    let transport = MockTransport::new();
    let (mut harness, reporter) = harness(config(1, 2, Some(5)), &transport);

    let started = Instant::now();
    harness.run().await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(!reporter
        .events()
        .iter()
        .any(|event| matches!(event, HarnessEvent::Interrupted)));
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_drain_waits_for_stop() {
    let transport = MockTransport::new();
    let (harness, _reporter) = harness(config(1, 2, None), &transport);
    let stop = harness.stop_handle();
    let run = spawn_run(harness);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!run.is_finished());

    stop.request_stop();
    let (result, harness) = run.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(harness.state(), HarnessState::Stopped);
    assert_eq!(transport.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_disconnect_confirmation_is_bounded() {
    let transport = MockTransport::new().without_disconnect_callback();
    let (mut harness, _reporter) = harness(config(1, 2, Some(0)), &transport);

    let started = Instant::now();
    harness.run().await.unwrap();

    // Waits for the confirmation that never comes, then gives up
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(harness.state(), HarnessState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_event_sequence_for_one_round() {
    let transport = MockTransport::new();
    let (mut harness, reporter) = harness(config(1, 2, Some(0)), &transport);
    harness.run().await.unwrap();

    let names: Vec<&'static str> = reporter
        .events()
        .iter()
        .filter_map(|event| match event {
            HarnessEvent::Starting => Some("starting"),
            HarnessEvent::Connecting { .. } => Some("connecting"),
            HarnessEvent::Connected { .. } => Some("connected"),
            HarnessEvent::Subscribed { .. } => Some("subscribed"),
            HarnessEvent::PublishingStarted { .. } => Some("publishing"),
            HarnessEvent::RoundProgress { .. } => Some("round"),
            HarnessEvent::Draining { .. } => Some("draining"),
            HarnessEvent::Disconnected => Some("disconnected"),
            HarnessEvent::Finished(_) => Some("finished"),
            _ => None,
        })
        .collect();

    assert_eq!(
        names,
        vec![
            "starting",
            "connecting",
            "connected",
            "subscribed",
            "subscribed",
            "subscribed",
            "subscribed",
            "publishing",
            "round",
            "draining",
            "disconnected",
            "finished",
        ]
    );
}
