//! Supervisors implement the service contract themselves, so they nest.

mod common;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::{wait_until, RecordingHooks, TestService};
use servisor::{
    Group, GroupSettings, Restarter, RestarterSettings, Sequence, SequenceSettings, Service,
    ServiceError, ServiceRef, State,
};

#[tokio::test]
async fn restarter_inside_a_sequence_restarts_transparently() {
    let database = TestService::arc("database");
    let worker = TestService::arc("worker");
    let restarter = Arc::new(
        Restarter::new(RestarterSettings {
            service: worker.clone(),
            hooks: None,
        })
        .expect("valid settings"),
    );

    let sequence = Sequence::new(SequenceSettings {
        name: "app".to_owned(),
        services_start: vec![database.clone() as ServiceRef, restarter.clone() as ServiceRef],
        services_stop: vec![restarter.clone() as ServiceRef, database.clone() as ServiceRef],
        hooks: Some(RecordingHooks::arc()),
    })
    .expect("valid settings");

    let mut run_error = sequence
        .start(CancellationToken::new())
        .await
        .expect("start");

    // The worker crash is handled by the restarter and never reaches the
    // sequence.
    worker.crash(ServiceError::other("temporary"));
    wait_until("the worker to be restarted", || worker.starts() == 2).await;
    assert_eq!(sequence.state().await, State::Running);
    assert!(run_error.try_recv().is_err());

    sequence.stop().await.expect("stop");
    assert_eq!(worker.stops(), 1);
    assert_eq!(database.stops(), 1);
    assert_eq!(restarter.state().await, State::Stopped);
}

#[tokio::test]
async fn group_crash_escalates_through_the_sequence() {
    let database = TestService::arc("database");
    let a = TestService::arc("a");
    let b = TestService::arc("b");
    let group = Arc::new(
        Group::new(GroupSettings {
            name: "pool".to_owned(),
            services: vec![a.clone() as ServiceRef, b.clone() as ServiceRef],
            hooks: None,
        })
        .expect("valid settings"),
    );

    let sequence = Sequence::new(SequenceSettings {
        name: "app".to_owned(),
        services_start: vec![database.clone() as ServiceRef, group.clone() as ServiceRef],
        services_stop: vec![group.clone() as ServiceRef, database.clone() as ServiceRef],
        hooks: None,
    })
    .expect("valid settings");

    let mut run_error = sequence
        .start(CancellationToken::new())
        .await
        .expect("start");

    a.crash(ServiceError::other("boom"));

    // The group stops its survivor and crashes; the sequence observes the
    // group's crash, stops the database and forwards the whole chain.
    let err = run_error.recv().await.expect("crash forwarded");
    assert_eq!(err.to_string(), "group pool crashed: a crashed: boom");
    assert!(run_error.recv().await.is_none());

    assert_eq!(a.stops(), 0);
    assert_eq!(b.stops(), 1);
    assert_eq!(database.stops(), 1);
    assert_eq!(group.state().await, State::Crashed);
    assert_eq!(sequence.state().await, State::Crashed);

    sequence.stop().await.expect("stop after crash");
    assert_eq!(sequence.state().await, State::Stopped);
}
