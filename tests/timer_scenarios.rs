mod support;

use healthmon::discovery::parse_annotation;
use healthmon::probe::ProbeOutcome;
use healthmon::status::HealthStatus;

use support::{timer_with, RecordingChannel, ScriptedRunner};

#[tokio::test(start_paused = true)]
async fn always_healthy_without_grace_emits_healthy_every_tick() {
    let config = parse_annotation(
        r#"{"test":["CMD-SHELL","true"],"interval":1,"timeout":5,"start_period":0,"retries":3}"#,
    )
    .expect("valid annotation");

    let channel = RecordingChannel::new();
    let mut timer = timer_with("ctr-1", config, ScriptedRunner::default(), &channel);

    timer.start().await.expect("start");
    channel.wait_for_updates(3).await;
    timer.stop().await;

    let emissions = channel.emissions();
    assert_eq!(
        &emissions[..3],
        &[
            (HealthStatus::Healthy, 0),
            (HealthStatus::Healthy, 0),
            (HealthStatus::Healthy, 0),
        ]
    );

    // No grace window: a starting update is never emitted.
    assert!(emissions
        .iter()
        .all(|(status, _)| *status != HealthStatus::Starting));
}

#[tokio::test(start_paused = true)]
async fn startup_grace_emits_starting_then_healthy() {
    let config = parse_annotation(
        r#"{"test":["CMD-SHELL","true"],"interval":2,"timeout":5,"start_period":4,"retries":3}"#,
    )
    .expect("valid annotation");

    let channel = RecordingChannel::new();
    let runner = ScriptedRunner::default();
    let mut timer = timer_with("ctr-1", config, runner.clone(), &channel);

    timer.start().await.expect("start");
    channel.wait_for_updates(3).await;
    timer.stop().await;

    let emissions = channel.emissions();
    assert_eq!(
        &emissions[..3],
        &[
            (HealthStatus::Starting, 0),
            (HealthStatus::Healthy, 0),
            (HealthStatus::Healthy, 0),
        ]
    );

    // The first tick sits inside the grace window and must not probe.
    assert_eq!(runner.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn failures_stay_silent_until_the_retry_threshold_is_crossed() {
    let config = parse_annotation(
        r#"{"test":["CMD-SHELL","false"],"interval":1,"timeout":5,"start_period":0,"retries":2}"#,
    )
    .expect("valid annotation");

    let channel = RecordingChannel::new();
    let runner = ScriptedRunner::always(ProbeOutcome::exited(1));
    let mut timer = timer_with("ctr-1", config, runner.clone(), &channel);

    timer.start().await.expect("start");
    channel.wait_for_updates(2).await;
    timer.stop().await;

    // Ticks one and two fail below the threshold and emit nothing; every
    // tick from the third on emits unhealthy.
    let emissions = channel.emissions();
    assert_eq!(
        &emissions[..2],
        &[(HealthStatus::Unhealthy, 1), (HealthStatus::Unhealthy, 1)]
    );
    assert_eq!(emissions.len(), runner.calls() - 2);
}

#[tokio::test(start_paused = true)]
async fn success_resets_the_failure_counter() {
    let config = parse_annotation(
        r#"{"test":["CMD-SHELL","check"],"interval":1,"timeout":5,"start_period":0,"retries":2}"#,
    )
    .expect("valid annotation");

    let channel = RecordingChannel::new();
    let runner = ScriptedRunner::with_outcomes(vec![
        ProbeOutcome::exited(1),
        ProbeOutcome::exited(1),
        ProbeOutcome::exited(0),
        ProbeOutcome::exited(0),
    ]);
    let mut timer = timer_with("ctr-1", config, runner.clone(), &channel);

    timer.start().await.expect("start");
    channel.wait_for_updates(2).await;
    let consecutive_failures = timer.snapshot().await.consecutive_failures;
    timer.stop().await;

    // Two sub-threshold failures emit nothing; the recovery emits healthy
    // and resets the counter.
    let emissions = channel.emissions();
    assert_eq!(
        &emissions[..2],
        &[(HealthStatus::Healthy, 0), (HealthStatus::Healthy, 0)]
    );
    assert_eq!(consecutive_failures, 0);
    assert!(runner.calls() >= 4);
}

#[tokio::test(start_paused = true)]
async fn failure_on_the_last_grace_tick_is_not_counted() {
    let config = parse_annotation(
        r#"{"test":["CMD-SHELL","false"],"interval":2,"timeout":5,"start_period":4,"retries":1}"#,
    )
    .expect("valid annotation");

    let channel = RecordingChannel::new();
    let runner = ScriptedRunner::always(ProbeOutcome::exited(1));
    let mut timer = timer_with("ctr-1", config, runner.clone(), &channel);

    timer.start().await.expect("start");
    channel.wait_for_updates(3).await;
    timer.stop().await;

    let emissions = channel.emissions();
    // Tick one: inside grace, announce starting. Tick two: the window
    // empties; the probe runs but its failure is not held against the
    // retry budget, the update carries the unchanged status. Tick three:
    // first counted failure, and with one retry allowed it crosses the
    // threshold immediately.
    assert_eq!(
        &emissions[..3],
        &[
            (HealthStatus::Starting, 0),
            (HealthStatus::Starting, 1),
            (HealthStatus::Unhealthy, 1),
        ]
    );
    assert_eq!(runner.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn collapsed_status_sequence_follows_the_state_graph() {
    let config = parse_annotation(
        r#"{"test":["CMD-SHELL","check"],"interval":1,"timeout":5,"start_period":2,"retries":0}"#,
    )
    .expect("valid annotation");

    let channel = RecordingChannel::new();
    let runner = ScriptedRunner::with_outcomes(vec![
        ProbeOutcome::exited(0),
        ProbeOutcome::exited(1),
        ProbeOutcome::exited(0),
    ]);
    let mut timer = timer_with("ctr-1", config, runner, &channel);

    timer.start().await.expect("start");
    channel.wait_for_updates(4).await;
    timer.stop().await;

    let mut collapsed: Vec<HealthStatus> = Vec::new();
    for (status, _) in channel.emissions() {
        if collapsed.last() != Some(&status) {
            collapsed.push(status);
        }
    }

    assert_eq!(
        &collapsed[..4],
        &[
            HealthStatus::Starting,
            HealthStatus::Healthy,
            HealthStatus::Unhealthy,
            HealthStatus::Healthy,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn zero_retries_flips_unhealthy_on_the_first_counted_failure() {
    let config = parse_annotation(
        r#"{"test":["CMD-SHELL","false"],"interval":1,"timeout":5,"start_period":0,"retries":0}"#,
    )
    .expect("valid annotation");

    let channel = RecordingChannel::new();
    let runner = ScriptedRunner::always(ProbeOutcome::exited(1));
    let mut timer = timer_with("ctr-1", config, runner.clone(), &channel);

    timer.start().await.expect("start");
    channel.wait_for_updates(1).await;
    let snapshot = timer.snapshot().await;
    timer.stop().await;

    assert_eq!(channel.emissions()[0], (HealthStatus::Unhealthy, 1));
    // The threshold crossing happens at exactly retries + 1 failures.
    assert_eq!(snapshot.consecutive_failures, 1);
}
