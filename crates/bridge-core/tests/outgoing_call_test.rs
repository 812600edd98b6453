//! Outgoing call flows through the coordinator
//!
//! Covers start submission and its perform callback, end buffering behind an
//! unresolved start, protocol mismatches, and the answer/mute/end submissions
//! on an established call.

mod common;

use chrono::Utc;
use common::*;

use callbridge_core::prelude::*;

#[tokio::test]
async fn test_start_success_activates_call() {
    let (authority, mut probe) = MockAuthority::new();
    let handler = MockHandler::accepting();
    let coordinator = coordinator(authority.clone(), Some(handler.clone()));
    let mut events = coordinator.subscribe_events();
    let mut active = coordinator.has_active_calls();
    assert!(!*active.borrow_and_update());

    let started = coordinator
        .submit_start(start_request(42, "Alice").with_local_contact_id("contact-7"))
        .await
        .unwrap();

    let request = probe.next_request().await;
    assert_eq!(request.kind, ActionKind::Start);
    assert_eq!(request.identity, started.identity);
    assert_eq!(
        request.params,
        ActionParams::Start {
            handle: CallHandle::generic("42"),
            contact_identifier: "Alice".to_string(),
            is_video: false,
        }
    );

    let rx = perform(&coordinator, &request).await;
    assert_eq!(resolution(rx).await, ActionResolution::Fulfilled { ended_at: None });
    settle(started.outcome).await.unwrap();

    settle(active.wait_for(|active| *active)).await.unwrap();
    let snapshot = coordinator.snapshot().await.unwrap();
    assert_eq!(snapshot.active_calls, vec![started.identity]);
    assert_eq!(snapshot.starting, None);
    assert_eq!(snapshot.outstanding_actions, 0);
    assert_eq!(snapshot.calls[0].phase, CallPhase::Connecting);

    let activations = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, BridgeEvent::ActiveCallsChanged { has_active_calls: true }))
        .count();
    assert_eq!(activations, 1);

    assert_eq!(
        handler.entries(),
        vec![format!("start:account-1:{}:Some(PeerId(42)):42:false", started.identity)]
    );

    let interactions = authority.interactions.lock().clone();
    assert_eq!(interactions.len(), 1);
    assert_eq!(interactions[0].handle, "tg42");
    assert_eq!(interactions[0].contact_identifier.as_deref(), Some("contact-7"));

    // Accepted start is followed by a call update for the authority's UI
    wait_until(|| authority.updates.lock().len() == 1).await;
    let (identity, update) = authority.updates.lock()[0].clone();
    assert_eq!(identity, started.identity);
    assert_eq!(update.localized_caller_name.as_deref(), Some("Alice"));
    assert!(!update.supports_holding && !update.supports_dtmf);
}

#[tokio::test]
async fn test_phone_number_selects_phone_handle() {
    let (authority, mut probe) = MockAuthority::new();
    let coordinator = coordinator(authority, Some(MockHandler::accepting()));

    coordinator
        .submit_start(start_request(7, "Bob").with_phone_number("+15550100").with_video(true))
        .await
        .unwrap();

    let request = probe.next_request().await;
    match request.params {
        ActionParams::Start { handle, is_video, .. } => {
            assert_eq!(handle, CallHandle::phone_number("+15550100"));
            assert!(is_video);
        }
        other => panic!("expected start params, got {:?}", other),
    }
}

#[tokio::test]
async fn test_start_declined_by_handler() {
    let (authority, mut probe) = MockAuthority::new();
    let coordinator = coordinator(authority, Some(MockHandler::declining_start()));
    let mut events = coordinator.subscribe_events();

    let started = coordinator.submit_start(start_request(1, "Carol")).await.unwrap();
    let request = probe.next_request().await;
    let rx = perform(&coordinator, &request).await;

    assert_eq!(resolution(rx).await, ActionResolution::Failed);
    let err = settle(started.outcome).await.unwrap_err();
    assert_eq!(
        err,
        BridgeError::HandlerDeclined {
            kind: ActionKind::Start,
            identity: started.identity,
        }
    );

    let snapshot = coordinator.snapshot().await.unwrap();
    assert!(snapshot.active_calls.is_empty());
    assert!(snapshot.calls.is_empty(), "failed start must purge the call record");
    assert!(!*coordinator.has_active_calls().borrow());

    let events = drain(&mut events);
    assert!(events.contains(&BridgeEvent::call_failed(started.identity, &err)));
    assert!(!events.iter().any(|event| matches!(event, BridgeEvent::ActiveCallsChanged { .. })));
}

#[tokio::test]
async fn test_start_rejected_by_authority_frees_slot() {
    let (authority, mut probe) = MockAuthority::new();
    authority.reject(ActionKind::Start);
    let coordinator = coordinator(authority, Some(MockHandler::accepting()));

    let started = coordinator.submit_start(start_request(5, "Dave")).await.unwrap();
    probe.next_request().await;

    let err = settle(started.outcome).await.unwrap_err();
    assert!(matches!(err, BridgeError::SubmissionRejected { kind: ActionKind::Start, .. }));

    // Slot is free again; the retry gets a fresh identity
    let retry = coordinator.submit_start(start_request(5, "Dave")).await.unwrap();
    assert_ne!(retry.identity, started.identity);
}

#[tokio::test]
async fn test_second_start_while_outstanding_is_rejected() {
    let (authority, _probe) = MockAuthority::new();
    let coordinator = coordinator(authority, Some(MockHandler::accepting()));

    let first = coordinator.submit_start(start_request(1, "First")).await.unwrap();
    let err = coordinator.submit_start(start_request(2, "Second")).await.unwrap_err();

    assert_eq!(err, BridgeError::StartInProgress { identity: first.identity });
    let snapshot = coordinator.snapshot().await.unwrap();
    assert_eq!(snapshot.calls.len(), 1);
    assert_eq!(snapshot.starting, Some(first.identity));
}

#[tokio::test]
async fn test_end_buffered_behind_start() {
    let (authority, mut probe) = MockAuthority::new();
    let handler = MockHandler::accepting();
    let coordinator = coordinator(authority, Some(handler.clone()));

    let started = coordinator.submit_start(start_request(9, "Erin")).await.unwrap();
    let start = probe.next_request().await;

    let end_outcome = coordinator.submit_end(started.identity).await.unwrap();
    probe.expect_no_request().await;

    // A second end while the first is held back is still in flight
    let err = coordinator.submit_end(started.identity).await.unwrap_err();
    assert!(matches!(err, BridgeError::ActionInFlight { kind: ActionKind::End, .. }));

    let rx = perform(&coordinator, &start).await;
    assert!(resolution(rx).await.is_fulfilled());
    settle(started.outcome).await.unwrap();

    let end = probe.next_request().await;
    assert_eq!(end.kind, ActionKind::End);
    assert_eq!(end.identity, started.identity);

    let rx = perform(&coordinator, &end).await;
    match resolution(rx).await {
        ActionResolution::Fulfilled { ended_at } => assert!(ended_at.is_some()),
        other => panic!("end should be fulfilled, got {:?}", other),
    }
    settle(end_outcome).await.unwrap();

    assert!(!*coordinator.has_active_calls().borrow());
    assert!(handler.entries().contains(&format!("end:{}", started.identity)));
    assert!(coordinator.snapshot().await.unwrap().calls.is_empty());
}

#[tokio::test]
async fn test_end_discarded_when_start_fails() {
    let (authority, mut probe) = MockAuthority::new();
    let coordinator = coordinator(authority, Some(MockHandler::declining_start()));

    let started = coordinator.submit_start(start_request(3, "Frank")).await.unwrap();
    let start = probe.next_request().await;
    let end_outcome = coordinator.submit_end(started.identity).await.unwrap();

    let rx = perform(&coordinator, &start).await;
    assert_eq!(resolution(rx).await, ActionResolution::Failed);

    assert!(settle(started.outcome).await.is_err());
    let err = settle(end_outcome).await.unwrap_err();
    assert!(matches!(err, BridgeError::Discarded { kind: ActionKind::End, .. }));
    probe.expect_no_request().await;
}

#[tokio::test]
async fn test_perform_start_for_other_identity_is_mismatch() {
    let (authority, mut probe) = MockAuthority::new();
    let handler = MockHandler::accepting();
    let coordinator = coordinator(authority, Some(handler.clone()));
    let mut events = coordinator.subscribe_events();

    let started = coordinator.submit_start(start_request(11, "Grace")).await.unwrap();
    let start = probe.next_request().await;

    let stranger = CallIdentity::new();
    let bogus = ActionRequest::start(stranger, CallHandle::generic("11"), "Grace", false);
    let rx = perform(&coordinator, &bogus).await;
    assert_eq!(resolution(rx).await, ActionResolution::Failed);
    assert!(handler.entries().is_empty());

    // The real start is unaffected
    let rx = perform(&coordinator, &start).await;
    assert!(resolution(rx).await.is_fulfilled());
    settle(started.outcome).await.unwrap();

    let mismatches: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, BridgeEvent::ProtocolMismatch { .. }))
        .collect();
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].identity(), Some(stranger));
}

#[tokio::test]
async fn test_perform_start_without_handler_fails() {
    let (authority, mut probe) = MockAuthority::new();
    let coordinator = coordinator(authority, None);

    let started = coordinator.submit_start(start_request(4, "Heidi")).await.unwrap();
    let start = probe.next_request().await;
    let rx = perform(&coordinator, &start).await;

    assert_eq!(resolution(rx).await, ActionResolution::Failed);
    assert_eq!(
        settle(started.outcome).await.unwrap_err(),
        BridgeError::UnhandledCallback {
            callback: CallbackKind::Start
        }
    );
}

#[tokio::test]
async fn test_handler_installed_after_build() {
    let (authority, mut probe) = MockAuthority::new();
    let coordinator = coordinator(authority, None);
    let handler = MockHandler::accepting();
    coordinator.set_handler(handler.clone()).await.unwrap();

    let identity = established_call(&coordinator, &mut probe, 8).await;
    assert_eq!(handler.entries().len(), 1);

    coordinator.clear_handler().await.unwrap();
    let outcome = coordinator.submit_mute(identity, true).await.unwrap();
    let mute = probe.next_request().await;
    let rx = perform(&coordinator, &mute).await;
    assert_eq!(resolution(rx).await, ActionResolution::Failed);
    assert_eq!(
        settle(outcome).await.unwrap_err(),
        BridgeError::UnhandledCallback {
            callback: CallbackKind::Mute
        }
    );
}

#[tokio::test]
async fn test_concurrent_end_and_mute_resolve_independently() {
    let (authority, mut probe) = MockAuthority::new();
    let handler = MockHandler::accepting();
    let coordinator = coordinator(authority, Some(handler.clone()));
    let identity = established_call(&coordinator, &mut probe, 21).await;

    let mute_outcome = coordinator.submit_mute(identity, true).await.unwrap();
    let end_outcome = coordinator.submit_end(identity).await.unwrap();

    let first = probe.next_request().await;
    let second = probe.next_request().await;
    let (mute, end) = if first.kind == ActionKind::Mute {
        (first, second)
    } else {
        (second, first)
    };
    assert_eq!(mute.params, ActionParams::Mute { muted: true });
    assert_eq!(end.kind, ActionKind::End);

    let mute_rx = perform(&coordinator, &mute).await;
    let end_rx = perform(&coordinator, &end).await;

    assert!(resolution(mute_rx).await.is_fulfilled());
    assert!(resolution(end_rx).await.is_fulfilled());
    settle(mute_outcome).await.unwrap();
    settle(end_outcome).await.unwrap();

    let entries = handler.entries();
    assert!(entries.contains(&format!("mute:{}:true", identity)));
    assert!(entries.contains(&format!("end:{}", identity)));
    assert!(!*coordinator.has_active_calls().borrow());
}

#[tokio::test]
async fn test_duplicate_action_is_in_flight() {
    let (authority, mut probe) = MockAuthority::new();
    let coordinator = coordinator(authority, Some(MockHandler::accepting()));
    let identity = established_call(&coordinator, &mut probe, 2).await;

    let _first = coordinator.submit_mute(identity, true).await.unwrap();
    let err = coordinator.submit_mute(identity, false).await.unwrap_err();
    assert_eq!(
        err,
        BridgeError::ActionInFlight {
            kind: ActionKind::Mute,
            identity
        }
    );
}

#[tokio::test]
async fn test_action_for_unknown_call() {
    let (authority, _probe) = MockAuthority::new();
    let coordinator = coordinator(authority, Some(MockHandler::accepting()));
    let identity = CallIdentity::new();

    let err = coordinator.submit_answer(identity).await.unwrap_err();
    assert_eq!(err, BridgeError::CallNotFound { identity });
}

#[tokio::test]
async fn test_end_declined_still_clears_bookkeeping() {
    let (authority, mut probe) = MockAuthority::new();
    let coordinator = coordinator(authority, Some(MockHandler::declining_end()));
    let identity = established_call(&coordinator, &mut probe, 6).await;

    let outcome = coordinator.submit_end(identity).await.unwrap();
    let end = probe.next_request().await;
    let rx = perform(&coordinator, &end).await;

    assert_eq!(resolution(rx).await, ActionResolution::Failed);
    assert_eq!(
        settle(outcome).await.unwrap_err(),
        BridgeError::HandlerDeclined {
            kind: ActionKind::End,
            identity
        }
    );
    assert!(!*coordinator.has_active_calls().borrow());
    assert!(coordinator.snapshot().await.unwrap().calls.is_empty());
}

#[tokio::test]
async fn test_end_rejected_by_authority_still_clears_bookkeeping() {
    let (authority, mut probe) = MockAuthority::new();
    authority.reject(ActionKind::End);
    let coordinator = coordinator(authority, Some(MockHandler::accepting()));
    let identity = established_call(&coordinator, &mut probe, 12).await;

    let outcome = coordinator.submit_end(identity).await.unwrap();
    probe.next_request().await;

    let err = settle(outcome).await.unwrap_err();
    assert!(matches!(err, BridgeError::SubmissionRejected { kind: ActionKind::End, .. }));
    assert!(!*coordinator.has_active_calls().borrow());
    assert!(coordinator.snapshot().await.unwrap().calls.is_empty());
}

#[tokio::test]
async fn test_outgoing_progress_reports() {
    let (authority, mut probe) = MockAuthority::new();
    let coordinator = coordinator(authority.clone(), Some(MockHandler::accepting()));
    let identity = established_call(&coordinator, &mut probe, 30).await;

    coordinator.report_outgoing_connecting(identity, Utc::now()).await.unwrap();
    coordinator.report_outgoing_connected(identity, Utc::now()).await.unwrap();

    let snapshot = coordinator.snapshot().await.unwrap();
    assert_eq!(snapshot.calls[0].phase, CallPhase::Connected);
    assert_eq!(
        *authority.progress.lock(),
        vec![(identity, "connecting"), (identity, "connected")]
    );
}

#[tokio::test]
async fn test_drop_call_reports_remote_end() {
    let (authority, mut probe) = MockAuthority::new();
    let coordinator = coordinator(authority.clone(), Some(MockHandler::accepting()));
    let mut events = coordinator.subscribe_events();
    let identity = established_call(&coordinator, &mut probe, 14).await;

    coordinator.drop_call(identity).await.unwrap();
    let snapshot = coordinator.snapshot().await.unwrap();

    assert!(snapshot.active_calls.is_empty());
    assert!(snapshot.calls.is_empty());
    assert_eq!(*authority.ended.lock(), vec![(identity, CallEndedReason::RemoteEnded)]);
    assert!(
        drain(&mut events)
            .iter()
            .any(|event| matches!(event, BridgeEvent::CallEnded { identity: ended, .. } if *ended == identity))
    );
}

#[tokio::test]
async fn test_repeated_perform_start_runs_handler_once() {
    let (authority, mut probe) = MockAuthority::new();
    let handler = MockHandler::accepting();
    let gate = handler.gate_start();
    let coordinator = coordinator(authority, Some(handler.clone()));
    let mut events = coordinator.subscribe_events();

    let started = coordinator.submit_start(start_request(21, "Ivan")).await.unwrap();
    let start = probe.next_request().await;

    let first = perform(&coordinator, &start).await;
    wait_until(|| handler.entries().len() == 1).await;
    let second = perform(&coordinator, &start).await;
    assert_eq!(resolution(second).await, ActionResolution::Failed);

    // The slot stays taken while the handler runs
    assert_eq!(
        coordinator.submit_start(start_request(22, "Judy")).await.unwrap_err(),
        BridgeError::StartInProgress {
            identity: started.identity
        }
    );

    gate.notify_one();
    assert!(resolution(first).await.is_fulfilled());
    settle(started.outcome).await.unwrap();
    assert_eq!(handler.entries().len(), 1);

    let mismatches: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, BridgeEvent::ProtocolMismatch { kind: ActionKind::Start, .. }))
        .collect();
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].identity(), Some(started.identity));
}

#[tokio::test]
async fn test_end_performed_while_start_handler_runs() {
    let (authority, mut probe) = MockAuthority::new();
    let handler = MockHandler::accepting();
    let gate = handler.gate_start();
    let coordinator = coordinator(authority, Some(handler.clone()));

    let started = coordinator.submit_start(start_request(23, "Karl")).await.unwrap();
    let start = probe.next_request().await;
    let start_rx = perform(&coordinator, &start).await;
    wait_until(|| handler.entries().len() == 1).await;

    // Ended from the system UI before the application finished starting
    let end_rx = perform(&coordinator, &ActionRequest::end(started.identity)).await;
    assert!(resolution(end_rx).await.is_fulfilled());

    // The start handler is abandoned and the authority told the start failed
    assert_eq!(resolution(start_rx).await, ActionResolution::Failed);
    let err = settle(started.outcome).await.unwrap_err();
    assert!(matches!(err, BridgeError::Discarded { kind: ActionKind::Start, .. }));

    gate.notify_one();
    let snapshot = coordinator.snapshot().await.unwrap();
    assert!(snapshot.calls.is_empty());
    assert!(snapshot.active_calls.is_empty());
    assert_eq!(snapshot.starting, None);
    assert_eq!(snapshot.outstanding_operations, 0);

    // The slot is free for the next call
    coordinator.submit_start(start_request(24, "Lena")).await.unwrap();
}

#[tokio::test]
async fn test_start_accepted_after_perform_updates_call() {
    let (authority, mut probe) = MockAuthority::new();
    let gate = authority.gate_requests();
    let coordinator = coordinator(authority.clone(), Some(MockHandler::accepting()));

    let started = coordinator.submit_start(start_request(25, "Mona")).await.unwrap();
    let start = probe.next_request().await;

    // The perform callback overtakes the authority's reply to the request
    let rx = perform(&coordinator, &start).await;
    assert!(resolution(rx).await.is_fulfilled());
    settle(started.outcome).await.unwrap();
    assert!(authority.updates.lock().is_empty());

    gate.notify_one();
    wait_until(|| authority.updates.lock().len() == 1).await;
    assert_eq!(authority.updates.lock()[0].0, started.identity);
    let snapshot = coordinator.snapshot().await.unwrap();
    assert_eq!(snapshot.active_calls, vec![started.identity]);
}

#[tokio::test]
async fn test_late_start_rejection_keeps_established_call() {
    let (authority, mut probe) = MockAuthority::new();
    let gate = authority.gate_requests();
    let coordinator = coordinator(authority.clone(), Some(MockHandler::accepting()));
    let mut events = coordinator.subscribe_events();

    let started = coordinator.submit_start(start_request(26, "Nina")).await.unwrap();
    let start = probe.next_request().await;
    let rx = perform(&coordinator, &start).await;
    assert!(resolution(rx).await.is_fulfilled());
    settle(started.outcome).await.unwrap();

    authority.reject(ActionKind::Start);
    gate.notify_one();

    let mut seen = Vec::new();
    loop {
        let event = settle(events.next()).await.expect("event stream open");
        let done = matches!(event, BridgeEvent::ProtocolMismatch { kind: ActionKind::Start, .. });
        seen.push(event);
        if done {
            break;
        }
    }
    assert_eq!(seen.last().and_then(BridgeEvent::identity), Some(started.identity));
    assert!(!seen.iter().any(|event| matches!(event, BridgeEvent::CallFailed { .. })));

    let snapshot = coordinator.snapshot().await.unwrap();
    assert_eq!(snapshot.active_calls, vec![started.identity]);
    assert_eq!(snapshot.calls.len(), 1);
    assert_eq!(snapshot.calls[0].identity, started.identity);
    assert!(*coordinator.has_active_calls().borrow());
}
