//! Funnel action tests against the SQLite store and a counting verifier.

mod common;

use common::{event_types, service, unthrottled, FlakyStore, StubVerifier};
use leadfunnel_kernel::country::NoHeaders;
use leadfunnel_kernel::funnel::FunnelSettings;
use leadfunnel_kernel::{ActionError, StartLeadRequest, StepAnswers};
use leadfunnel_memory::LeadStore;
use leadfunnel_types::lead::{GoalTemplate, HandoffChannel, LeadStatus, Timeframe};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

fn rhinoplasty() -> StartLeadRequest {
    StartLeadRequest {
        clinic_id: "clinic-42".to_string(),
        clinic_slug: "bosphorus-aesthetics".to_string(),
        page_context: "Rhinoplasty in Istanbul".to_string(),
    }
}

fn asap_appearance() -> StepAnswers {
    StepAnswers {
        timeframe: Some("asap".to_string()),
        goal_template: Some("appearance".to_string()),
        ..StepAnswers::default()
    }
}

#[tokio::test]
async fn test_end_to_end_six_events() {
    let store = FlakyStore::new();
    let verifier = StubVerifier::approving("000000");
    let funnel = service(store.clone(), verifier.clone(), FunnelSettings::default());

    let headers: HashMap<String, String> =
        [("x-vercel-ip-country".to_string(), "US".to_string())].into();
    let started = funnel.start_lead(&rhinoplasty(), &headers).await.unwrap();
    assert_eq!(started.country.as_deref(), Some("US"));
    let id = started.lead_id.as_str();

    funnel.save_step(id, &asap_appearance()).await.unwrap();
    funnel.send_otp(id, "+12015550123").await.unwrap();
    funnel.verify_otp(id, "+12015550123", "000000").await.unwrap();
    funnel.set_channel(id, "whatsapp").await.unwrap();

    let lead = store.get_lead(id).await.unwrap().unwrap();
    assert_eq!(lead.status, LeadStatus::HandoffCompleted);
    assert!(lead.phone_verified);
    assert_eq!(lead.preferred_channel, Some(HandoffChannel::Whatsapp));
    assert_eq!(lead.phone_e164.as_deref(), Some("+12015550123"));
    assert_eq!(lead.verification_provider.as_deref(), Some("stub"));
    assert_eq!(lead.timeframe, Some(Timeframe::Asap));
    assert_eq!(lead.goal_template, Some(GoalTemplate::Appearance));
    assert_eq!(lead.page_context_original, "Rhinoplasty in Istanbul");
    assert_eq!(lead.page_context_final, "Rhinoplasty in Istanbul");

    let events = store.list_events(id).await.unwrap();
    assert_eq!(
        event_types(&events),
        vec![
            "lead_started",
            "step_completed",
            "otp_sent",
            "otp_verify_attempt",
            "otp_verified",
            "handoff_clicked",
        ]
    );
    assert!(events.windows(2).all(|w| w[0].created_at <= w[1].created_at));

    // Only the last four digits are ever written to the audit log.
    let otp_sent = &events[2].payload;
    assert_eq!(otp_sent["phone_last4"], "0123");
    assert_eq!(otp_sent["provider"], "stub");
    assert_eq!(otp_sent["success"], true);
    for event in &events {
        assert!(!event.payload.to_string().contains("2015550123"));
    }
    assert_eq!(
        events[1].payload,
        serde_json::json!({"timeframe": "asap", "goal_template": "appearance"})
    );
    assert_eq!(events[5].payload, serde_json::json!({"channel": "whatsapp"}));
}

#[tokio::test]
async fn test_formatting_variants_store_same_number() {
    let store = FlakyStore::new();
    let verifier = StubVerifier::approving("000000");
    let funnel = service(store.clone(), verifier.clone(), unthrottled());

    for input in ["+1 (201) 555-0123", "001 201 555 0123", "+1-201-555-0123"] {
        let id = funnel
            .start_lead(&rhinoplasty(), &NoHeaders)
            .await
            .unwrap()
            .lead_id;
        funnel.send_otp(&id, input).await.unwrap();
        let lead = store.get_lead(&id).await.unwrap().unwrap();
        assert_eq!(lead.phone_e164.as_deref(), Some("+12015550123"), "{input}");
    }
    assert_eq!(verifier.sends(), 3);
}

#[tokio::test]
async fn test_invalid_input_never_reaches_provider() {
    let store = FlakyStore::new();
    let verifier = StubVerifier::approving("000000");
    let funnel = service(store.clone(), verifier.clone(), unthrottled());
    let id = funnel
        .start_lead(&rhinoplasty(), &NoHeaders)
        .await
        .unwrap()
        .lead_id;

    for bad in ["", "hello", "+1 555", "12345", "+0 201 555 0123"] {
        let err = funnel.send_otp(&id, bad).await.unwrap_err();
        assert!(matches!(err, ActionError::Validation(_)), "{bad}: {err:?}");
        let err = funnel.verify_otp(&id, bad, "000000").await.unwrap_err();
        assert!(matches!(err, ActionError::Validation(_)), "{bad}: {err:?}");
    }
    for bad_code in ["", "123", "1234567", "12a456"] {
        let err = funnel
            .verify_otp(&id, "+12015550123", bad_code)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Please enter the 6-digit code we sent you");
    }

    assert_eq!(verifier.sends(), 0);
    assert_eq!(verifier.checks(), 0);
    let lead = store.get_lead(&id).await.unwrap().unwrap();
    assert!(lead.phone_e164.is_none());
    assert_eq!(event_types(&store.list_events(&id).await.unwrap()), vec!["lead_started"]);
}

#[tokio::test]
async fn test_missing_lead_id_rejected_before_store() {
    let store = FlakyStore::new();
    store.fail_updates.store(true, Ordering::SeqCst);
    let verifier = StubVerifier::approving("000000");
    let funnel = service(store.clone(), verifier.clone(), unthrottled());

    for result in [
        funnel.save_step("", &asap_appearance()).await,
        funnel.send_otp(" ", "+12015550123").await,
        funnel.verify_otp("", "+12015550123", "000000").await,
        funnel.set_channel("", "sms").await,
    ] {
        assert_eq!(result.unwrap_err(), ActionError::missing_lead_id());
    }
    assert_eq!(verifier.sends() + verifier.checks(), 0);
}

#[tokio::test]
async fn test_unknown_lead_writes_no_event() {
    let store = FlakyStore::new();
    let verifier = StubVerifier::approving("000000");
    let funnel = service(store.clone(), verifier.clone(), unthrottled());

    assert_eq!(
        funnel.save_step("nope", &asap_appearance()).await,
        Err(ActionError::NotFound)
    );
    assert_eq!(
        funnel.send_otp("nope", "+12015550123").await,
        Err(ActionError::NotFound)
    );
    assert_eq!(funnel.set_channel("nope", "email").await, Err(ActionError::NotFound));
    assert_eq!(verifier.sends(), 0);
    assert!(store.list_events("nope").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_wrong_code_does_not_verify() {
    let store = FlakyStore::new();
    let verifier = StubVerifier::approving("000000");
    let funnel = service(store.clone(), verifier.clone(), unthrottled());
    let id = funnel
        .start_lead(&rhinoplasty(), &NoHeaders)
        .await
        .unwrap()
        .lead_id;
    funnel.send_otp(&id, "+12015550123").await.unwrap();

    let err = funnel
        .verify_otp(&id, "+12015550123", "111111")
        .await
        .unwrap_err();
    assert_eq!(err, ActionError::Provider("Invalid code".to_string()));

    let lead = store.get_lead(&id).await.unwrap().unwrap();
    assert!(!lead.phone_verified);
    assert_eq!(lead.status, LeadStatus::Started);

    let events = store.list_events(&id).await.unwrap();
    let attempt = events.last().unwrap();
    assert_eq!(attempt.event_type, "otp_verify_attempt");
    assert_eq!(attempt.payload["success"], false);
}

#[tokio::test]
async fn test_provider_send_failure_still_persists_number() {
    let store = FlakyStore::new();
    let verifier = StubVerifier::approving("000000");
    verifier.send_ok.store(false, Ordering::SeqCst);
    let funnel = service(store.clone(), verifier.clone(), unthrottled());
    let id = funnel
        .start_lead(&rhinoplasty(), &NoHeaders)
        .await
        .unwrap()
        .lead_id;

    let err = funnel.send_otp(&id, "+44 20 7946 0958").await.unwrap_err();
    assert_eq!(
        err,
        ActionError::Provider("Carrier rejected the message".to_string())
    );

    let lead = store.get_lead(&id).await.unwrap().unwrap();
    assert_eq!(lead.phone_e164.as_deref(), Some("+442079460958"));
    assert_eq!(lead.verification_provider.as_deref(), Some("stub"));

    let events = store.list_events(&id).await.unwrap();
    assert_eq!(events.last().unwrap().payload["success"], false);
}

#[tokio::test]
async fn test_status_never_regresses() {
    let store = FlakyStore::new();
    let verifier = StubVerifier::approving("000000");
    let funnel = service(store.clone(), verifier.clone(), unthrottled());
    let id = funnel
        .start_lead(&rhinoplasty(), &NoHeaders)
        .await
        .unwrap()
        .lead_id;
    funnel.send_otp(&id, "+12015550123").await.unwrap();
    funnel.verify_otp(&id, "+12015550123", "000000").await.unwrap();

    funnel
        .save_step(
            &id,
            &StepAnswers {
                details: Some("Second thoughts about the date".to_string()),
                ..StepAnswers::default()
            },
        )
        .await
        .unwrap();
    let lead = store.get_lead(&id).await.unwrap().unwrap();
    assert_eq!(lead.status, LeadStatus::Verified);

    funnel.set_channel(&id, "sms").await.unwrap();
    funnel.save_step(&id, &asap_appearance()).await.unwrap();
    let lead = store.get_lead(&id).await.unwrap().unwrap();
    assert_eq!(lead.status, LeadStatus::HandoffCompleted);
}

#[tokio::test]
async fn test_only_set_channel_completes_handoff() {
    let store = FlakyStore::new();
    let verifier = StubVerifier::approving("000000");
    let funnel = service(store.clone(), verifier.clone(), unthrottled());
    let id = funnel
        .start_lead(&rhinoplasty(), &NoHeaders)
        .await
        .unwrap()
        .lead_id;

    funnel.save_step(&id, &asap_appearance()).await.unwrap();
    funnel.send_otp(&id, "+12015550123").await.unwrap();
    funnel.verify_otp(&id, "+12015550123", "000000").await.unwrap();
    assert_ne!(
        store.get_lead(&id).await.unwrap().unwrap().status,
        LeadStatus::HandoffCompleted
    );

    let err = funnel.set_channel(&id, "carrier-pigeon").await.unwrap_err();
    assert!(matches!(err, ActionError::Validation(_)));
    assert_eq!(
        store.get_lead(&id).await.unwrap().unwrap().status,
        LeadStatus::Verified
    );
}

#[tokio::test]
async fn test_empty_step_is_noop() {
    let store = FlakyStore::new();
    let verifier = StubVerifier::approving("000000");
    let funnel = service(store.clone(), verifier.clone(), unthrottled());
    let id = funnel
        .start_lead(&rhinoplasty(), &NoHeaders)
        .await
        .unwrap()
        .lead_id;
    let before = store.get_lead(&id).await.unwrap().unwrap();

    funnel.save_step(&id, &StepAnswers::default()).await.unwrap();
    funnel
        .save_step(
            &id,
            &StepAnswers {
                category: Some("   ".to_string()),
                details: Some(String::new()),
                ..StepAnswers::default()
            },
        )
        .await
        .unwrap();

    let after = store.get_lead(&id).await.unwrap().unwrap();
    assert_eq!(after.category, before.category);
    assert_eq!(after.details, before.details);
    assert_eq!(after.status, before.status);
    assert_eq!(event_types(&store.list_events(&id).await.unwrap()), vec!["lead_started"]);
}

#[tokio::test]
async fn test_steps_do_not_clobber_each_other() {
    let store = FlakyStore::new();
    let verifier = StubVerifier::approving("000000");
    let settings = FunnelSettings {
        details_max_len: 10,
        ..unthrottled()
    };
    let funnel = service(store.clone(), verifier.clone(), settings);
    let id = funnel
        .start_lead(&rhinoplasty(), &NoHeaders)
        .await
        .unwrap()
        .lead_id;

    funnel
        .save_step(
            &id,
            &StepAnswers {
                category: Some("nose".to_string()),
                page_context: Some("Closed rhinoplasty in Istanbul".to_string()),
                ..StepAnswers::default()
            },
        )
        .await
        .unwrap();
    funnel
        .save_step(
            &id,
            &StepAnswers {
                timeframe: Some("1_3_months".to_string()),
                ..StepAnswers::default()
            },
        )
        .await
        .unwrap();
    funnel
        .save_step(
            &id,
            &StepAnswers {
                goal_template: Some("expert_advice".to_string()),
                details: Some("  I had surgery before  ".to_string()),
                ..StepAnswers::default()
            },
        )
        .await
        .unwrap();

    let lead = store.get_lead(&id).await.unwrap().unwrap();
    assert_eq!(lead.category.as_deref(), Some("nose"));
    assert_eq!(lead.timeframe, Some(Timeframe::OneToThreeMonths));
    assert_eq!(lead.goal_template, Some(GoalTemplate::ExpertAdvice));
    assert_eq!(lead.details.as_deref(), Some("I had surg"));
    assert_eq!(lead.page_context_original, "Rhinoplasty in Istanbul");
    assert_eq!(lead.page_context_final, "Closed rhinoplasty in Istanbul");

    let err = funnel
        .save_step(
            &id,
            &StepAnswers {
                timeframe: Some("someday".to_string()),
                ..StepAnswers::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::Validation(_)));
}

#[tokio::test]
async fn test_server_resend_throttle() {
    let store = FlakyStore::new();
    let verifier = StubVerifier::approving("000000");
    let funnel = service(store.clone(), verifier.clone(), FunnelSettings::default());
    let id = funnel
        .start_lead(&rhinoplasty(), &NoHeaders)
        .await
        .unwrap()
        .lead_id;

    funnel.send_otp(&id, "+12015550123").await.unwrap();
    let err = funnel.send_otp(&id, "+12015550123").await.unwrap_err();
    match err {
        ActionError::Throttled { retry_after_secs } => {
            assert!((1..=30).contains(&retry_after_secs))
        }
        other => panic!("expected throttle, got {other:?}"),
    }
    assert_eq!(verifier.sends(), 1);

    // The throttle is per lead.
    let other = funnel
        .start_lead(&rhinoplasty(), &NoHeaders)
        .await
        .unwrap()
        .lead_id;
    funnel.send_otp(&other, "+12015550123").await.unwrap();
    assert_eq!(verifier.sends(), 2);
}

#[tokio::test]
async fn test_failed_send_does_not_start_throttle() {
    let store = FlakyStore::new();
    let verifier = StubVerifier::approving("000000");
    let funnel = service(store.clone(), verifier.clone(), FunnelSettings::default());
    let id = funnel
        .start_lead(&rhinoplasty(), &NoHeaders)
        .await
        .unwrap()
        .lead_id;

    assert_eq!(
        funnel.send_otp("no-such-lead", "+12015550123").await,
        Err(ActionError::NotFound)
    );
    funnel.send_otp("no-such-lead", "+12015550123").await.unwrap_err();

    store.fail_updates.store(true, Ordering::SeqCst);
    let err = funnel.send_otp(&id, "+12015550123").await.unwrap_err();
    assert!(matches!(err, ActionError::Store(_)));
    assert_eq!(verifier.sends(), 0);

    // Once the store recovers the visitor can retry straight away.
    store.fail_updates.store(false, Ordering::SeqCst);
    funnel.send_otp(&id, "+12015550123").await.unwrap();
    assert_eq!(verifier.sends(), 1);
    assert!(matches!(
        funnel.send_otp(&id, "+12015550123").await,
        Err(ActionError::Throttled { .. })
    ));
}

#[tokio::test]
async fn test_stale_throttle_and_lockout_state_is_pruned() {
    let store = FlakyStore::new();
    let verifier = StubVerifier::approving("000000");
    let settings = FunnelSettings {
        max_verify_attempts: 2,
        resend_cooldown: Some(Duration::from_millis(300)),
        lockout_window: Duration::from_millis(300),
        ..FunnelSettings::default()
    };
    let funnel = service(store.clone(), verifier.clone(), settings);
    let abandoned = funnel
        .start_lead(&rhinoplasty(), &NoHeaders)
        .await
        .unwrap()
        .lead_id;

    funnel.send_otp(&abandoned, "+12015550123").await.unwrap();
    for _ in 0..2 {
        funnel
            .verify_otp(&abandoned, "+12015550123", "999999")
            .await
            .unwrap_err();
    }
    assert_eq!(
        funnel.verify_otp(&abandoned, "+12015550123", "000000").await,
        Err(ActionError::Locked)
    );
    assert_eq!(funnel.tracked_leads(), 2);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let next = funnel
        .start_lead(&rhinoplasty(), &NoHeaders)
        .await
        .unwrap()
        .lead_id;
    funnel.send_otp(&next, "+12015557654").await.unwrap();
    assert_eq!(funnel.tracked_leads(), 1);

    // Completing the hand-off forgets the lead entirely.
    funnel.set_channel(&next, "sms").await.unwrap();
    assert_eq!(funnel.tracked_leads(), 0);
}

#[tokio::test]
async fn test_lockout_after_repeated_wrong_codes() {
    let store = FlakyStore::new();
    let verifier = StubVerifier::approving("000000");
    let settings = FunnelSettings {
        max_verify_attempts: 3,
        ..unthrottled()
    };
    let funnel = service(store.clone(), verifier.clone(), settings);
    let id = funnel
        .start_lead(&rhinoplasty(), &NoHeaders)
        .await
        .unwrap()
        .lead_id;
    funnel.send_otp(&id, "+12015550123").await.unwrap();

    for _ in 0..3 {
        let err = funnel
            .verify_otp(&id, "+12015550123", "999999")
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Provider(_)));
    }
    assert_eq!(
        funnel.verify_otp(&id, "+12015550123", "000000").await,
        Err(ActionError::Locked)
    );
    assert_eq!(verifier.checks(), 3);

    // A fresh code unlocks the lead.
    funnel.send_otp(&id, "+12015550123").await.unwrap();
    funnel.verify_otp(&id, "+12015550123", "000000").await.unwrap();
    assert!(store.get_lead(&id).await.unwrap().unwrap().phone_verified);
}

#[tokio::test]
async fn test_changing_number_clears_verification() {
    let store = FlakyStore::new();
    let verifier = StubVerifier::approving("000000");
    let funnel = service(store.clone(), verifier.clone(), unthrottled());
    let id = funnel
        .start_lead(&rhinoplasty(), &NoHeaders)
        .await
        .unwrap()
        .lead_id;
    funnel.send_otp(&id, "+12015550123").await.unwrap();
    funnel.verify_otp(&id, "+12015550123", "000000").await.unwrap();

    // Same number again keeps the flag.
    funnel.send_otp(&id, "+1 201 555 0123").await.unwrap();
    assert!(store.get_lead(&id).await.unwrap().unwrap().phone_verified);

    funnel.send_otp(&id, "+12015559876").await.unwrap();
    let lead = store.get_lead(&id).await.unwrap().unwrap();
    assert!(!lead.phone_verified);
    assert_eq!(lead.phone_e164.as_deref(), Some("+12015559876"));
}

#[tokio::test]
async fn test_store_failures_are_opaque() {
    let store = FlakyStore::new();
    let verifier = StubVerifier::approving("000000");
    let funnel = service(store.clone(), verifier.clone(), unthrottled());
    let id = funnel
        .start_lead(&rhinoplasty(), &NoHeaders)
        .await
        .unwrap()
        .lead_id;

    store.fail_inserts.store(true, Ordering::SeqCst);
    let err = funnel.start_lead(&rhinoplasty(), &NoHeaders).await.unwrap_err();
    assert_eq!(err.to_string(), "Could not create lead");

    store.fail_updates.store(true, Ordering::SeqCst);
    let err = funnel.save_step(&id, &asap_appearance()).await.unwrap_err();
    assert!(matches!(err, ActionError::Store(_)));
    assert!(!err.to_string().contains("disk"));

    // The number could not be stored, so no code goes out.
    let err = funnel.send_otp(&id, "+12015550123").await.unwrap_err();
    assert!(matches!(err, ActionError::Store(_)));
    assert_eq!(verifier.sends(), 0);
}

#[tokio::test]
async fn test_audit_failure_does_not_break_actions() {
    let store = FlakyStore::new();
    store.fail_events.store(true, Ordering::SeqCst);
    let verifier = StubVerifier::approving("000000");
    let funnel = service(store.clone(), verifier.clone(), unthrottled());

    let id = funnel
        .start_lead(&rhinoplasty(), &NoHeaders)
        .await
        .unwrap()
        .lead_id;
    funnel.save_step(&id, &asap_appearance()).await.unwrap();
    funnel.send_otp(&id, "+12015550123").await.unwrap();
    funnel.verify_otp(&id, "+12015550123", "000000").await.unwrap();
    funnel.set_channel(&id, "email").await.unwrap();

    let lead = store.get_lead(&id).await.unwrap().unwrap();
    assert_eq!(lead.status, LeadStatus::HandoffCompleted);
    assert!(store.list_events(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_clinic_rejected() {
    let store = FlakyStore::new();
    let funnel = service(
        store.clone(),
        StubVerifier::approving("000000"),
        unthrottled(),
    );
    let req = StartLeadRequest {
        clinic_id: "  ".to_string(),
        ..rhinoplasty()
    };
    assert!(matches!(
        funnel.start_lead(&req, &NoHeaders).await,
        Err(ActionError::Validation(_))
    ));
}
