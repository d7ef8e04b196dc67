//! Network link lifecycle through the supervisor
//!
//! Drives the link with provider signals and checks the state timeline, the
//! commands issued to the provider and the effect on the session.


use std::time::Duration;
use test_helpers::{address, Harness};
use uplink::link::{LinkMachine, LinkNotification, LinkSignal, LinkState};
use uplink::retry::RetryPolicy;
use uplink::session::SessionState;
use uplink::testing::NetworkCall;

#[test]
fn test_started_then_address_reaches_up() {
    let mut harness = Harness::new();
    harness.supervisor.start();
    harness.link(LinkSignal::Started);
    assert_eq!(harness.supervisor.link_state(), &LinkState::Associating);

    harness.link(LinkSignal::AddressAcquired(address(20)));

    assert_eq!(harness.supervisor.link_state(), &LinkState::Up(address(20)));
    assert_eq!(harness.supervisor.link_retries(), 0);
    assert_eq!(
        harness
            .sink
            .messages("link")
            .iter()
            .filter(|m| m.starts_with("link ready"))
            .count(),
        1
    );
    assert_eq!(
        harness.network.calls(),
        vec![
            NetworkCall::Start,
            NetworkCall::Associate {
                attempt: 0,
                delay: Duration::ZERO
            }
        ]
    );
}

#[test]
fn test_link_ready_fires_once_per_address() {
    let mut machine = LinkMachine::new(RetryPolicy::bounded(5));
    machine.start();
    machine.apply(LinkSignal::Started);

    let first = machine.apply(LinkSignal::AddressAcquired(address(20)));
    let repeat = machine.apply(LinkSignal::AddressAcquired(address(20)));
    let moved = machine.apply(LinkSignal::AddressAcquired(address(21)));

    assert_eq!(first.notifications, vec![LinkNotification::Ready(address(20))]);
    assert!(repeat.notifications.is_empty());
    assert!(repeat.ignored.is_some());
    assert_eq!(moved.notifications, vec![LinkNotification::Ready(address(21))]);
}

#[test]
fn test_consecutive_losses_exhaust_retries_then_fail_once() {
    let mut harness = Harness::new();
    harness.bring_link_up();

    for expected in 1..=5 {
        harness.link(LinkSignal::Lost);
        assert_eq!(harness.supervisor.link_state(), &LinkState::Associating);
        assert_eq!(harness.supervisor.link_retries(), expected);
    }
    assert_eq!(harness.supervisor.link_failure(), None);

    harness.link(LinkSignal::Lost);
    assert_eq!(harness.supervisor.link_state(), &LinkState::Failed);
    assert_eq!(harness.supervisor.link_failure(), Some(5));

    // Further losses are ignored and do not re-announce the failure
    harness.link(LinkSignal::Lost);
    harness.link(LinkSignal::Lost);
    assert_eq!(harness.supervisor.link_state(), &LinkState::Failed);
    assert_eq!(
        harness
            .sink
            .messages("link")
            .iter()
            .filter(|m| m.starts_with("link failed"))
            .count(),
        1
    );
}

#[test]
fn test_retry_delays_follow_backoff_pattern() {
    let mut harness = Harness::new();
    harness.bring_link_up();
    for _ in 0..5 {
        harness.link(LinkSignal::Lost);
    }

    let delays: Vec<(u32, u64)> = harness
        .network
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            NetworkCall::Associate { attempt, delay } if attempt > 0 => {
                Some((attempt, delay.as_millis() as u64))
            }
            _ => None,
        })
        .collect();

    assert_eq!(
        delays,
        vec![(1, 0), (2, 250), (3, 500), (4, 1000), (5, 2000)]
    );
}

#[test]
fn test_address_resets_retry_counter() {
    let mut harness = Harness::new();
    harness.bring_link_up();
    harness.link(LinkSignal::Lost);
    harness.link(LinkSignal::Lost);
    assert_eq!(harness.supervisor.link_retries(), 2);

    harness.link(LinkSignal::AddressAcquired(address(30)));
    assert_eq!(harness.supervisor.link_retries(), 0);

    for _ in 0..5 {
        harness.link(LinkSignal::Lost);
    }
    assert_eq!(harness.supervisor.link_state(), &LinkState::Associating);
}

#[test]
fn test_loss_while_idle_is_ignored() {
    let mut harness = Harness::new();
    harness.link(LinkSignal::Lost);

    assert_eq!(harness.supervisor.link_state(), &LinkState::Idle);
    assert!(harness.network.calls().is_empty());
    assert!(harness.sink.contains("link", "ignored"));
}

#[test]
fn test_restart_after_failure() {
    let mut harness = Harness::new();
    harness.bring_link_up();
    for _ in 0..6 {
        harness.link(LinkSignal::Lost);
    }
    assert_eq!(harness.supervisor.link_state(), &LinkState::Failed);

    harness.supervisor.restart_link();

    assert_eq!(harness.supervisor.link_state(), &LinkState::Associating);
    assert_eq!(harness.supervisor.link_retries(), 0);
    assert_eq!(harness.supervisor.link_failure(), None);

    harness.link(LinkSignal::AddressAcquired(address(20)));
    assert_eq!(harness.supervisor.session_state(), SessionState::Connecting);
}

#[test]
fn test_address_after_failure_recovers_without_restart() {
    let mut harness = Harness::new();
    harness.bring_link_up();
    for _ in 0..6 {
        harness.link(LinkSignal::Lost);
    }
    assert_eq!(harness.supervisor.link_failure(), Some(5));

    harness.link(LinkSignal::AddressAcquired(address(20)));

    assert_eq!(harness.supervisor.link_state(), &LinkState::Up(address(20)));
    assert_eq!(harness.supervisor.link_failure(), None);
    assert_eq!(harness.supervisor.link_retries(), 0);
    assert_eq!(harness.supervisor.session_state(), SessionState::Connecting);
}

#[test]
fn test_every_transition_is_recorded() {
    let mut harness = Harness::new();
    harness.bring_link_up();
    harness.link(LinkSignal::Lost);

    let messages = harness.sink.messages("link");
    assert!(messages.iter().any(|m| m.starts_with("idle -> associating")));
    assert!(messages.iter().any(|m| m.starts_with("associating -> up(10.10.78.20)")));
    assert!(messages
        .iter()
        .any(|m| m.starts_with("up(10.10.78.20) -> retrying retries=1/5")));
    assert!(messages
        .iter()
        .any(|m| m.starts_with("retrying -> associating retries=1/5")));
}
