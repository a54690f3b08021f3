//! Start/stop/restart behaviour of the connection monitor

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use rvoip_quality_core::{
    ConnectionId, ConnectionMonitor, Error, EventFilter, EventKind, QualityConfig, QualityEvent,
    ScoreWeights, StopReason,
};

use common::{advance_to, count_updates, ms, Conditions, ScriptedTransport};

fn stop_reasons(events: &[QualityEvent]) -> Vec<StopReason> {
    events
        .iter()
        .filter_map(|event| match event {
            QualityEvent::MonitoringStopped { reason, .. } => Some(*reason),
            _ => None,
        })
        .collect()
}

#[test]
fn test_invalid_configuration_is_rejected_at_construction() {
    let config = QualityConfig::default().with_weights(ScoreWeights {
        audio: 0.5,
        video: 0.5,
        connection: 0.5,
    });

    match ConnectionMonitor::new(config) {
        Err(Error::ConfigurationInvalid { message }) => assert!(message.contains("weights")),
        other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test(start_paused = true)]
async fn test_invalid_override_is_rejected() {
    let monitor = ConnectionMonitor::new(QualityConfig::default()).unwrap();
    let id = ConnectionId::new("peer-1");
    let transport = Arc::new(ScriptedTransport::new(Conditions::good()));
    let config = QualityConfig::default().with_sampling_interval(Duration::ZERO);

    let result = monitor
        .start_monitoring_with_config(id.clone(), transport.clone(), config)
        .await;

    assert!(matches!(result, Err(Error::ConfigurationInvalid { .. })));
    assert!(!monitor.is_monitoring(&id));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_per_connection_interval_override() {
    let monitor = ConnectionMonitor::new(QualityConfig::default()).unwrap();
    let id = ConnectionId::new("peer-1");
    let transport = Arc::new(ScriptedTransport::new(Conditions::good()));
    let config = QualityConfig::default().with_sampling_interval(Duration::from_millis(500));
    let start = Instant::now();

    monitor
        .start_monitoring_with_config(id.clone(), transport.clone(), config)
        .await
        .unwrap();
    advance_to(start, ms(5_200)).await;

    // one baseline pull plus ten ticks
    assert_eq!(transport.calls(), 11);
    assert_eq!(monitor.monitor_stats(&id).unwrap().ticks_processed, 10);
}

#[tokio::test(start_paused = true)]
async fn test_first_sample_only_primes_the_baseline() {
    let monitor = ConnectionMonitor::new(QualityConfig::default()).unwrap();
    let id = ConnectionId::new("peer-1");
    let transport = Arc::new(ScriptedTransport::new(Conditions::bad()));
    let mut events = monitor.subscribe(EventFilter::all());

    monitor.start_monitoring(id.clone(), transport.clone()).await.unwrap();

    assert_eq!(transport.calls(), 1);
    assert!(monitor.is_monitoring(&id));
    assert!(monitor.latest_snapshot(&id).is_none());
    let kinds: Vec<EventKind> = events.drain().iter().map(QualityEvent::kind).collect();
    assert_eq!(kinds, vec![EventKind::MonitoringStarted]);
}

#[tokio::test(start_paused = true)]
async fn test_connection_closed_mid_monitoring() {
    let monitor = ConnectionMonitor::new(QualityConfig::default()).unwrap();
    let id = ConnectionId::new("peer-1");
    let transport = Arc::new(ScriptedTransport::new(Conditions::good()));
    let mut events = monitor.subscribe(EventFilter::connection(id.clone()));
    let start = Instant::now();

    monitor.start_monitoring(id.clone(), transport.clone()).await.unwrap();
    advance_to(start, ms(4_500)).await;
    transport.close();
    advance_to(start, ms(6_500)).await;

    assert!(!monitor.is_monitoring(&id));
    assert!(monitor.monitored_connections().is_empty());
    assert!(monitor.latest_snapshot(&id).is_none());

    let seen = events.drain();
    assert_eq!(count_updates(&seen), 2);
    assert_eq!(stop_reasons(&seen), vec![StopReason::ConnectionClosed]);
    assert!(matches!(seen.last(), Some(QualityEvent::MonitoringStopped { .. })));

    // the task is gone: no further pulls and no further events
    let calls = transport.calls();
    advance_to(start, ms(20_000)).await;
    assert_eq!(transport.calls(), calls);
    assert!(events.drain().is_empty());

    // stopping again is a no-op
    assert!(!monitor.stop_monitoring(&id).await);
    assert!(events.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_closed_before_start_registers_nothing() {
    let monitor = ConnectionMonitor::new(QualityConfig::default()).unwrap();
    let id = ConnectionId::new("peer-1");
    let transport = Arc::new(ScriptedTransport::new(Conditions::good()));
    transport.close();
    let mut events = monitor.subscribe(EventFilter::all());

    let result = monitor.start_monitoring(id.clone(), transport).await;

    assert!(matches!(result, Err(Error::ConnectionClosed { .. })));
    assert!(!monitor.is_monitoring(&id));
    assert!(events.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_stats_skip_ticks() {
    let monitor = ConnectionMonitor::new(QualityConfig::default()).unwrap();
    let id = ConnectionId::new("peer-1");
    let transport = Arc::new(ScriptedTransport::new(Conditions::good()));
    let start = Instant::now();

    monitor.start_monitoring(id.clone(), transport.clone()).await.unwrap();
    transport.fail_next(2);
    advance_to(start, ms(8_500)).await;

    let stats = monitor.monitor_stats(&id).unwrap();
    assert_eq!(stats.ticks_skipped, 2);
    assert_eq!(stats.ticks_processed, 2);
    assert!(monitor.is_monitoring(&id));
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let monitor = ConnectionMonitor::new(QualityConfig::default()).unwrap();
    let id = ConnectionId::new("peer-1");
    let transport = Arc::new(ScriptedTransport::new(Conditions::good()));
    let mut events = monitor.subscribe(EventFilter::all());
    let start = Instant::now();

    assert!(!monitor.stop_monitoring(&id).await);

    monitor.start_monitoring(id.clone(), transport.clone()).await.unwrap();
    advance_to(start, ms(2_500)).await;

    assert!(monitor.stop_monitoring(&id).await);
    assert!(!monitor.stop_monitoring(&id).await);
    assert!(monitor.history(&id).is_empty());
    assert!(monitor.adaptation_state(&id).is_none());

    let calls = transport.calls();
    advance_to(start, ms(12_500)).await;
    assert_eq!(transport.calls(), calls);

    let seen = events.drain();
    assert_eq!(count_updates(&seen), 1);
    assert_eq!(stop_reasons(&seen), vec![StopReason::Requested]);
}

#[tokio::test(start_paused = true)]
async fn test_restart_replaces_previous_monitor() {
    let monitor = ConnectionMonitor::new(QualityConfig::default()).unwrap();
    let id = ConnectionId::new("peer-1");
    let first = Arc::new(ScriptedTransport::new(Conditions::good()));
    let second = Arc::new(ScriptedTransport::new(Conditions::good()));
    let mut events = monitor.subscribe(EventFilter::all());
    let start = Instant::now();

    monitor.start_monitoring(id.clone(), first.clone()).await.unwrap();
    advance_to(start, ms(2_500)).await;
    monitor.start_monitoring(id.clone(), second.clone()).await.unwrap();
    advance_to(start, ms(11_000)).await;

    assert_eq!(monitor.monitored_connections(), vec![id.clone()]);
    // first: baseline + tick at 2 s; second: baseline at 2.5 s + ticks at 4.5, 6.5, 8.5, 10.5
    assert_eq!(first.calls(), 2);
    assert_eq!(second.calls(), 5);

    let seen = events.drain();
    let kinds: Vec<EventKind> = seen
        .iter()
        .map(QualityEvent::kind)
        .filter(|kind| *kind != EventKind::QualityUpdated)
        .collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::MonitoringStarted,
            EventKind::MonitoringStopped,
            EventKind::MonitoringStarted,
        ]
    );
    assert_eq!(stop_reasons(&seen), vec![StopReason::Replaced]);
    assert_eq!(count_updates(&seen), 1 + 4);

    // fresh state: only the replacement's snapshots are kept
    assert_eq!(monitor.history(&id).len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_in_flight_pull_emits_nothing_more() {
    let monitor = ConnectionMonitor::new(QualityConfig::default()).unwrap();
    let id = ConnectionId::new("peer-1");
    let transport =
        Arc::new(ScriptedTransport::new(Conditions::bad()).with_delay(Duration::from_secs(1)));
    let mut events = monitor.subscribe(EventFilter::all());
    let start = Instant::now();

    // baseline pull completes at 1 s, first tick fires at 3 s and answers at 4 s
    monitor.start_monitoring(id.clone(), transport.clone()).await.unwrap();
    advance_to(start, ms(3_500)).await;
    assert_eq!(transport.calls(), 1);

    assert!(monitor.stop_monitoring(&id).await);
    advance_to(start, ms(20_000)).await;

    let kinds: Vec<EventKind> = events.drain().iter().map(QualityEvent::kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::MonitoringStarted, EventKind::MonitoringStopped]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_start_is_pulling_the_baseline() {
    let monitor = ConnectionMonitor::new(QualityConfig::default()).unwrap();
    let id = ConnectionId::new("peer-1");
    let transport =
        Arc::new(ScriptedTransport::new(Conditions::good()).with_delay(Duration::from_secs(1)));
    let mut events = monitor.subscribe(EventFilter::all());
    let start = Instant::now();

    let (started, stopped) = tokio::join!(
        monitor.start_monitoring(id.clone(), transport.clone()),
        async {
            advance_to(start, ms(500)).await;
            monitor.stop_monitoring(&id).await
        }
    );

    assert!(started.is_ok());
    assert!(stopped);
    assert!(!monitor.is_monitoring(&id));
    assert!(monitor.monitored_connections().is_empty());

    advance_to(start, ms(20_000)).await;
    // the outstanding pull was abandoned and no ticker was spawned
    assert_eq!(transport.calls(), 0);
    assert!(events.drain().is_empty());

    // the id can be monitored again afterwards
    monitor.start_monitoring(id.clone(), transport.clone()).await.unwrap();
    assert!(monitor.is_monitoring(&id));
    let kinds: Vec<EventKind> = events.drain().iter().map(QualityEvent::kind).collect();
    assert_eq!(kinds, vec![EventKind::MonitoringStarted]);
}

#[tokio::test(start_paused = true)]
async fn test_restart_while_start_is_pulling_the_baseline() {
    let monitor = ConnectionMonitor::new(QualityConfig::default()).unwrap();
    let id = ConnectionId::new("peer-1");
    let slow =
        Arc::new(ScriptedTransport::new(Conditions::good()).with_delay(Duration::from_secs(1)));
    let fast = Arc::new(ScriptedTransport::new(Conditions::good()));
    let mut events = monitor.subscribe(EventFilter::all());
    let start = Instant::now();

    let (first, second) = tokio::join!(
        monitor.start_monitoring(id.clone(), slow.clone()),
        async {
            advance_to(start, ms(500)).await;
            monitor.start_monitoring(id.clone(), fast.clone()).await
        }
    );
    assert!(first.is_ok());
    assert!(second.is_ok());

    advance_to(start, ms(5_000)).await;
    assert_eq!(slow.calls(), 0);
    // baseline at 0.5 s plus ticks at 2.5 and 4.5 s
    assert_eq!(fast.calls(), 3);

    let kinds: Vec<EventKind> = events
        .drain()
        .iter()
        .map(QualityEvent::kind)
        .filter(|kind| *kind != EventKind::QualityUpdated)
        .collect();
    assert_eq!(kinds, vec![EventKind::MonitoringStarted]);
}

#[tokio::test(start_paused = true)]
async fn test_connections_are_isolated() {
    let monitor = ConnectionMonitor::new(QualityConfig::default()).unwrap();
    let healthy = ConnectionId::new("healthy");
    let lossy = ConnectionId::new("lossy");
    let start = Instant::now();

    monitor
        .start_monitoring(healthy.clone(), Arc::new(ScriptedTransport::new(Conditions::good())))
        .await
        .unwrap();
    monitor
        .start_monitoring(lossy.clone(), Arc::new(ScriptedTransport::new(Conditions::bad())))
        .await
        .unwrap();
    advance_to(start, ms(2_500)).await;

    assert_eq!(monitor.adaptation_state(&healthy).unwrap().downgrade_count, 0);
    assert_eq!(monitor.adaptation_state(&lossy).unwrap().downgrade_count, 1);

    let mut ids = monitor.monitored_connections();
    ids.sort();
    assert_eq!(ids, vec![healthy.clone(), lossy.clone()]);

    monitor.shutdown().await;
    assert!(monitor.monitored_connections().is_empty());
}
