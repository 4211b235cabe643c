use super::*;
use crate::coordinator::CoordinatorBuilder;
use crate::engine::ScriptEngine;
use crate::test_helpers::*;
use crate::types::{SideContentTab, Testcase, TestcaseResult};
use serde_json::json;

const WS: WorkspaceId = WorkspaceId::Assessment;

fn with_testcases(harness: &Harness, programs: &[&str]) {
    harness
        .coordinator
        .workspace(&WS)
        .unwrap()
        .update(|state| {
            state.testcases = programs
                .iter()
                .map(|program| Testcase::new(*program, None))
                .collect();
        });
}

/// Testcase lifecycle events, without context or output bookkeeping
fn lifecycle(events: Vec<WorkspaceEvent>) -> Vec<WorkspaceEvent> {
    events
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                WorkspaceEvent::TestcaseReset { .. }
                    | WorkspaceEvent::RunStarted { .. }
                    | WorkspaceEvent::TestcaseSucceeded { .. }
                    | WorkspaceEvent::TestcaseFailed { .. }
            )
        })
        .collect()
}

#[tokio::test]
async fn test_testcases_run_strictly_in_order() {
    let h = harness();
    with_testcases(&h, &["finish 1", "fail 1 bad", "finish 3"]);
    let mut events = h.coordinator.subscribe();

    let summary = h.coordinator.run_all(&WS).await.unwrap();

    let started = |index| WorkspaceEvent::RunStarted {
        workspace: WS,
        mode: EvaluationMode::TestcaseRun(index),
    };
    assert_eq!(
        lifecycle(drain_events(&mut events)),
        vec![
            WorkspaceEvent::TestcaseReset { workspace: WS, index: 0 },
            started(0),
            WorkspaceEvent::TestcaseSucceeded { workspace: WS, index: 0 },
            WorkspaceEvent::TestcaseReset { workspace: WS, index: 1 },
            started(1),
            WorkspaceEvent::TestcaseFailed { workspace: WS, index: 1 },
            WorkspaceEvent::TestcaseReset { workspace: WS, index: 2 },
            started(2),
            WorkspaceEvent::TestcaseSucceeded { workspace: WS, index: 2 },
        ]
    );

    assert_eq!(summary.to_string(), "2 passed, 1 failed");
    assert_eq!(
        h.coordinator.engine().runs(),
        vec!["\nfinish 1", "\nfail 1 bad", "\nfinish 3"]
    );
}

#[tokio::test]
async fn test_each_testcase_gets_a_fresh_context_and_shared_output() {
    let h = harness();
    with_testcases(&h, &["log a\nfinish 1", "finish 2"]);
    let resets = h.coordinator.engine().context_resets();

    h.coordinator.run_all(&WS).await.unwrap();

    assert_eq!(h.coordinator.engine().context_resets(), resets + 2);
    let state = h.coordinator.snapshot(&WS).unwrap();
    assert_eq!(state.output.len(), 2);
    assert_eq!(state.testcases[0].result, TestcaseResult::Success(json!(1)));
    assert_eq!(state.testcases[1].result, TestcaseResult::Success(json!(2)));
}

#[tokio::test]
async fn test_empty_batch_is_silent() {
    let h = harness();
    let mut events = h.coordinator.subscribe();

    let summary = h.coordinator.run_all(&WS).await.unwrap();

    assert_eq!(summary, BatchSummary::default());
    assert!(h.notifier.texts().is_empty());
    assert!(drain_events(&mut events).is_empty());
}

#[tokio::test]
async fn test_interrupt_aborts_the_rest_of_the_batch() {
    let h = harness();
    with_testcases(&h, &["finish 1", "hang", "finish 3"]);
    let mut events = h.coordinator.subscribe();

    let task = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.run_all(&WS).await })
    };
    wait_for_event(&mut events, |event| {
        matches!(
            event,
            WorkspaceEvent::RunStarted {
                mode: EvaluationMode::TestcaseRun(1),
                ..
            }
        )
    })
    .await;

    assert!(h.coordinator.interrupt(&WS));
    let summary = task.await.unwrap().unwrap();

    assert!(summary.aborted);
    assert_eq!((summary.passed, summary.failed, summary.pending), (1, 1, 1));

    let state = h.coordinator.snapshot(&WS).unwrap();
    assert!(matches!(
        state.testcases[1].result,
        TestcaseResult::Failure(ref errors) if !errors.is_empty()
    ));
    assert_eq!(state.testcases[2].result, TestcaseResult::Pending);
    assert_eq!(
        h.notifier.texts(),
        vec![
            "Running all testcases!".to_string(),
            "Execution of testcase 1 aborted".to_string(),
            "Batch aborted".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_batch_waits_for_running_evaluation() {
    let h = harness();
    with_testcases(&h, &["finish 1"]);
    h.coordinator
        .workspace(&WS)
        .unwrap()
        .update(|state| state.editor_value = "sleep 20\nfinish 0".to_string());

    let editor = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.evaluate_editor(WS).await })
    };
    tokio::task::yield_now().await;
    h.coordinator.run_all(&WS).await.unwrap();

    assert_eq!(
        editor.await.unwrap().unwrap(),
        crate::types::RunOutcome::Finished(json!(0))
    );
    assert_eq!(h.coordinator.engine().max_in_flight(), 1);
}

#[tokio::test]
async fn test_autograder_batch_with_script_engine() {
    let notifier = Arc::new(RecordingNotifier::default());
    let coordinator = CoordinatorBuilder::new(ScriptEngine::new())
        .notifier(notifier.clone())
        .build();

    coordinator.workspace(&WS).unwrap().update(|state| {
        state.editor_value = "let x = 3".to_string();
        state.active_tab = SideContentTab::Autograder;
        state.testcases = vec![
            Testcase::new("x + 3", Some("6".to_string())),
            Testcase::new("x + x + 1", Some("7".to_string())),
        ];
    });

    coordinator.evaluate_editor(WS).await.unwrap();

    let state = coordinator.snapshot(&WS).unwrap();
    assert_eq!(state.testcases[0].result, TestcaseResult::Success(json!(6)));
    assert_eq!(state.testcases[1].result, TestcaseResult::Success(json!(7)));
    assert!(state.testcases.iter().all(Testcase::passed));
    assert_eq!(
        notifier.texts(),
        vec!["Running all testcases!".to_string(), "2 passed".to_string()]
    );
}
