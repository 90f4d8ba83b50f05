mod common;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::{RecordingHooks, TestService};
use servisor::{Sequence, SequenceSettings, Service, ServiceError, ServiceRef, State};

fn sequence_of(
    name: &str,
    services_start: Vec<ServiceRef>,
    services_stop: Vec<ServiceRef>,
    hooks: Arc<RecordingHooks>,
) -> Sequence {
    Sequence::new(SequenceSettings {
        name: name.to_owned(),
        services_start,
        services_stop,
        hooks: Some(hooks),
    })
    .expect("valid settings")
}

#[tokio::test]
async fn starts_and_stops_in_configured_orders() {
    let a = TestService::arc("A");
    let b = TestService::arc("B");
    let c = TestService::arc("C");
    let hooks = RecordingHooks::arc();
    let sequence = sequence_of(
        "s",
        vec![
            a.clone() as ServiceRef,
            b.clone() as ServiceRef,
            c.clone() as ServiceRef,
        ],
        vec![
            c.clone() as ServiceRef,
            b.clone() as ServiceRef,
            a.clone() as ServiceRef,
        ],
        hooks.clone(),
    );

    let _run_error = sequence.start(CancellationToken::new()).await.expect("start");
    assert_eq!(sequence.state().await, State::Running);
    sequence.stop().await.expect("stop");
    assert_eq!(sequence.state().await, State::Stopped);

    assert_eq!(
        hooks.events(),
        vec![
            "start A",
            "started A",
            "start B",
            "started B",
            "start C",
            "started C",
            "stop C",
            "stopped C",
            "stop B",
            "stopped B",
            "stop A",
            "stopped A",
        ],
    );
}

#[tokio::test]
async fn crash_stops_survivors_in_stop_order() {
    let a = TestService::arc("A");
    let b = TestService::arc("B");
    let c = TestService::arc("C");
    let hooks = RecordingHooks::arc();
    let sequence = sequence_of(
        "s",
        vec![
            a.clone() as ServiceRef,
            b.clone() as ServiceRef,
            c.clone() as ServiceRef,
        ],
        vec![
            c.clone() as ServiceRef,
            b.clone() as ServiceRef,
            a.clone() as ServiceRef,
        ],
        hooks.clone(),
    );

    let mut run_error = sequence.start(CancellationToken::new()).await.expect("start");

    b.crash(ServiceError::other("boom"));

    let err = run_error.recv().await.expect("crash forwarded");
    assert_eq!(err.to_string(), "B crashed: boom");
    assert!(run_error.recv().await.is_none());

    // The crashed service is skipped; the others stop in stop order.
    assert_eq!(b.stops(), 0);
    assert_eq!(c.stops(), 1);
    assert_eq!(a.stops(), 1);
    assert_eq!(sequence.state().await, State::Crashed);
    assert_eq!(
        hooks.events()[6..].to_vec(),
        vec!["crash B: boom", "stop C", "stopped C", "stop A", "stopped A"],
    );

    sequence.stop().await.expect("stop after crash");
    let err = sequence.stop().await.expect_err("second stop");
    assert_eq!(err.to_string(), "sequence s: already stopped");
}

#[tokio::test]
async fn start_failure_unwinds_started_services() {
    let a = TestService::arc("A");
    let b = TestService::arc("B");
    let c = TestService::arc("C");
    b.fail_next_start(ServiceError::other("test error"));
    let hooks = RecordingHooks::arc();
    let sequence = sequence_of(
        "s",
        vec![
            a.clone() as ServiceRef,
            b.clone() as ServiceRef,
            c.clone() as ServiceRef,
        ],
        vec![
            c.clone() as ServiceRef,
            b.clone() as ServiceRef,
            a.clone() as ServiceRef,
        ],
        hooks.clone(),
    );

    let err = sequence
        .start(CancellationToken::new())
        .await
        .expect_err("start must fail");
    assert_eq!(err.to_string(), "starting B: test error");
    let source = std::error::Error::source(&err).expect("cause preserved");
    assert_eq!(source.to_string(), "test error");

    // A was started and stopped; C was never reached.
    assert_eq!(a.starts(), 1);
    assert_eq!(a.stops(), 1);
    assert_eq!(c.starts(), 0);
    assert_eq!(b.stops(), 0);
    assert_eq!(sequence.state().await, State::Stopped);
}

#[tokio::test]
async fn canceled_start_reports_cancellation() {
    let a = TestService::arc("A");
    let b = TestService::arc("B");
    b.wait_for_cancel();
    let sequence = sequence_of(
        "s",
        vec![a.clone() as ServiceRef, b.clone() as ServiceRef],
        vec![b.clone() as ServiceRef, a.clone() as ServiceRef],
        RecordingHooks::arc(),
    );

    let ctx = CancellationToken::new();
    let handle = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            ctx.cancel();
        })
    };

    let err = sequence.start(ctx).await.expect_err("canceled start");
    handle.await.unwrap();

    assert!(err.is_canceled());
    assert_eq!(
        err.to_string(),
        "starting B: start interrupted: start canceled",
    );
    assert_eq!(sequence.state().await, State::Stopped);
    assert_eq!(a.stops(), 1);
    assert_eq!(b.stops(), 0);
}

#[tokio::test]
async fn stop_errors_are_aggregated_in_attempt_order() {
    let a = TestService::arc("A");
    let b = TestService::arc("B");
    let c = TestService::arc("C");
    b.fail_next_stop(ServiceError::other("test error 2"));
    c.fail_next_stop(ServiceError::other("test error 3"));
    let sequence = sequence_of(
        "s",
        vec![
            a.clone() as ServiceRef,
            b.clone() as ServiceRef,
            c.clone() as ServiceRef,
        ],
        vec![
            c.clone() as ServiceRef,
            b.clone() as ServiceRef,
            a.clone() as ServiceRef,
        ],
        RecordingHooks::arc(),
    );

    let _run_error = sequence.start(CancellationToken::new()).await.expect("start");
    let err = sequence.stop().await.expect_err("stop must fail");
    assert_eq!(
        err.to_string(),
        "stopping C: test error 3; stopping B: test error 2",
    );
    // All services were stopped despite the failures.
    assert_eq!(a.stops(), 1);
    assert_eq!(b.stops(), 1);
    assert_eq!(c.stops(), 1);
}

#[tokio::test]
async fn lifecycle_misuse_errors() {
    let a = TestService::arc("A");
    let sequence = sequence_of(
        "s",
        vec![a.clone() as ServiceRef],
        vec![a.clone() as ServiceRef],
        RecordingHooks::arc(),
    );

    let err = sequence.stop().await.expect_err("stop before start");
    assert_eq!(err.to_string(), "sequence s: already stopped");

    let _run_error = sequence.start(CancellationToken::new()).await.expect("start");
    let err = sequence
        .start(CancellationToken::new())
        .await
        .expect_err("second start");
    assert_eq!(err.to_string(), "sequence s: already started");

    sequence.stop().await.expect("stop");
}
