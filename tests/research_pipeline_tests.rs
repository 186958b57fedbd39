//! End-to-end behavior of the research pipeline against scripted
//! collaborators.

mod common;

use async_trait::async_trait;
use common::mocks::{
    ACCEPT, MockFetcher, MockLLMClient, REVISE, controller, evidence, test_config,
};
use deepcite::llm::PromptKind;
use deepcite::research::{
    ControllerOptions, Deliverable, EventKind, ExhaustionPolicy, FailureCause, PartialResult,
    ProgressEvent, RenderError, ReportRenderer, ResearchConfig, ResearchController,
    ReviewResolution, RunOutcome, Stage,
};
use futures::StreamExt;
use rand::Rng;
use rstest::rstest;
use std::sync::Arc;
use std::time::{Duration, Instant};

async fn run(
    controller: &ResearchController,
    query: &str,
    config: ResearchConfig,
) -> (RunOutcome, Vec<ProgressEvent>) {
    let id = controller.submit(query, config).unwrap();
    let events: Vec<_> = controller.subscribe(id).unwrap().collect().await;
    let outcome = controller.wait(id).await.unwrap();
    (outcome, events)
}

fn warnings(events: &[ProgressEvent]) -> Vec<&ProgressEvent> {
    events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::Warning { .. }))
        .collect()
}

fn started(events: &[ProgressEvent]) -> Vec<Stage> {
    events
        .iter()
        .filter_map(|e| match e.kind {
            EventKind::StageStarted { stage } => Some(stage),
            _ => None,
        })
        .collect()
}

fn drafts_produced(events: &[ProgressEvent]) -> usize {
    events
        .iter()
        .filter(|e| {
            matches!(
                e.kind,
                EventKind::PartialResult(PartialResult::DraftProduced { .. })
            )
        })
        .count()
}

// ============= Happy Path =============

#[tokio::test]
async fn test_pipeline_completes_with_ordered_stages() {
    let llm = Arc::new(MockLLMClient::planning(&["lithium supply", "recycling methods"]));
    let fetcher = Arc::new(MockFetcher::new());
    let controller = controller(llm, fetcher.clone());

    let (outcome, events) = run(&controller, "How are EV batteries recycled?", test_config()).await;

    assert_eq!(
        started(&events),
        vec![
            Stage::Planning,
            Stage::Gathering,
            Stage::Drafting,
            Stage::Reviewing,
            Stage::Publishing
        ]
    );
    assert_eq!(events.first().unwrap().sequence, 0);
    assert!(events.last().unwrap().is_terminal());
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let mut calls = fetcher.calls();
    calls.sort();
    assert_eq!(calls, vec!["lithium supply", "recycling methods"]);

    match outcome {
        RunOutcome::Completed {
            final_draft,
            resolution,
            sources,
            deliverable,
            publish_error,
        } => {
            assert_eq!(final_draft.version, 0);
            assert_eq!(resolution, ReviewResolution::Accepted);
            assert_eq!(sources.len(), 2);
            assert!(publish_error.is_none());
            let deliverable = deliverable.unwrap();
            assert!(deliverable.body.starts_with(&final_draft.body));
            assert!(deliverable.body.contains("1. https://example.com/lithium-supply"));
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

// ============= Determinism =============

#[tokio::test]
async fn test_context_order_independent_of_completion_timing() {
    let questions = ["q0", "q1", "q2"];
    let slow = Duration::from_millis(60);
    let fast = Duration::from_millis(1);

    let mut bodies = Vec::new();
    let mut source_lists = Vec::new();
    for delays in [[slow, fast, fast], [fast, fast, slow], [fast, slow, fast]] {
        let llm = Arc::new(MockLLMClient::planning(&questions).echoing(PromptKind::Draft));
        let mut fetcher = MockFetcher::new();
        for (i, (q, delay)) in questions.iter().zip(delays).enumerate() {
            let source = format!("https://s{i}.example");
            fetcher = fetcher.delayed(q, delay, &[(&source, "finding a"), (&source, "finding b")]);
        }

        let (outcome, _) = run(&controller(llm, Arc::new(fetcher)), "root", test_config()).await;
        match outcome {
            RunOutcome::Completed {
                final_draft,
                sources,
                ..
            } => {
                bodies.push(final_draft.body);
                source_lists.push(sources);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    assert!(bodies.windows(2).all(|w| w[0] == w[1]));
    assert!(source_lists.windows(2).all(|w| w[0] == w[1]));
    let order: Vec<_> = source_lists[0].iter().map(|s| s.sub_question).collect();
    assert_eq!(order, vec![0, 1, 2]);
}

// ============= Loop Termination =============

#[rstest]
#[case(0)]
#[case(1)]
#[case(2)]
#[case(3)]
#[tokio::test]
async fn test_review_loop_bounded_by_max_revisions(#[case] max_revisions: u32) {
    let llm = Arc::new(MockLLMClient::planning(&["a"]).with_reply(PromptKind::Review, REVISE));
    let controller = controller(llm.clone(), Arc::new(MockFetcher::new()));
    let config = ResearchConfig {
        max_revision_iterations: max_revisions,
        ..test_config()
    };

    let (outcome, events) = run(&controller, "root", config).await;

    assert_eq!(drafts_produced(&events), max_revisions as usize + 1);
    assert_eq!(llm.calls(PromptKind::Review), max_revisions + 1);
    assert_eq!(llm.calls(PromptKind::Revise), max_revisions);
    assert_eq!(warnings(&events).len(), 1);

    match outcome {
        RunOutcome::Completed {
            final_draft,
            resolution,
            ..
        } => {
            assert_eq!(final_draft.version, max_revisions);
            assert_eq!(resolution, ReviewResolution::Exhausted);
        }
        other => panic!("expected best-effort completion, got {other:?}"),
    }
}

#[tokio::test]
async fn test_revision_accepted_midway() {
    let llm = Arc::new(
        MockLLMClient::planning(&["a"]).with_replies(PromptKind::Review, [REVISE, ACCEPT]),
    );
    let controller = controller(llm.clone(), Arc::new(MockFetcher::new()));

    let (outcome, events) = run(&controller, "root", test_config()).await;

    assert_eq!(
        started(&events),
        vec![
            Stage::Planning,
            Stage::Gathering,
            Stage::Drafting,
            Stage::Reviewing,
            Stage::Revising,
            Stage::Reviewing,
            Stage::Publishing
        ]
    );
    match outcome {
        RunOutcome::Completed {
            final_draft,
            resolution,
            ..
        } => {
            assert_eq!(final_draft.version, 1);
            assert_eq!(final_draft.body, "Revised report [1].");
            assert_eq!(resolution, ReviewResolution::Accepted);
            assert_eq!(final_draft.critique.unwrap().issues, vec!["add more citations"]);
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn test_exhaustion_policy_fail() {
    let llm = Arc::new(MockLLMClient::planning(&["a"]).with_reply(PromptKind::Review, REVISE));
    let controller = controller(llm, Arc::new(MockFetcher::new()));
    let config = ResearchConfig {
        max_revision_iterations: 1,
        exhaustion_policy: ExhaustionPolicy::Fail,
        ..test_config()
    };

    let (outcome, events) = run(&controller, "root", config).await;

    match outcome {
        RunOutcome::Failed {
            stage,
            cause,
            last_draft,
        } => {
            assert_eq!(stage, Stage::Reviewing);
            assert_eq!(cause, FailureCause::RevisionExhausted(1));
            assert_eq!(last_draft.unwrap().version, 1);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(
        events
            .iter()
            .any(|e| matches!(e.kind, EventKind::Error { stage: Stage::Reviewing, .. }))
    );
}

// ============= Partial & Total Failure =============

#[tokio::test]
async fn test_partial_fetch_failures_are_warnings() {
    let questions = ["q0", "q1", "q2", "q3", "q4"];
    let llm = Arc::new(MockLLMClient::planning(&questions));
    let fetcher = Arc::new(MockFetcher::new().fail("q1").fail("q3"));
    let controller = controller(llm, fetcher);
    let config = ResearchConfig {
        max_sub_questions: 5,
        ..test_config()
    };

    let (outcome, events) = run(&controller, "root", config).await;

    let warned: Vec<_> = warnings(&events)
        .iter()
        .map(|e| match &e.kind {
            EventKind::Warning { sub_question, .. } => *sub_question,
            _ => None,
        })
        .collect();
    assert_eq!(warned.len(), 2);
    assert!(warned.contains(&Some(1)) && warned.contains(&Some(3)));

    match outcome {
        RunOutcome::Completed { sources, .. } => {
            let from: Vec<_> = sources.iter().map(|s| s.sub_question).collect();
            assert_eq!(from, vec![0, 2, 4]);
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn test_all_fetches_failing_is_no_evidence() {
    let llm = Arc::new(MockLLMClient::planning(&["q0", "q1", "q2"]));
    let fetcher = Arc::new(MockFetcher::new().fail("q0").fail("q1").fail("q2"));
    let controller = controller(llm.clone(), fetcher);

    let (outcome, events) = run(&controller, "root", test_config()).await;

    match outcome {
        RunOutcome::Failed { stage, cause, .. } => {
            assert_eq!(stage, Stage::Gathering);
            assert_eq!(cause, FailureCause::NoEvidence);
            assert!(cause.to_string().starts_with("no-evidence"));
        }
        other => panic!("expected no-evidence failure, got {other:?}"),
    }
    assert!(!started(&events).contains(&Stage::Drafting));
    assert_eq!(llm.calls(PromptKind::Draft), 0);

    match &events.last().unwrap().kind {
        EventKind::Terminal {
            state,
            failed_stage,
            cause,
            ..
        } => {
            assert_eq!(*state, Stage::Failed);
            assert_eq!(*failed_stage, Some(Stage::Gathering));
            assert_eq!(*cause, Some(FailureCause::NoEvidence));
        }
        other => panic!("expected terminal event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_results_are_no_evidence() {
    let llm = Arc::new(MockLLMClient::planning(&["q0"]));
    let fetcher = Arc::new(MockFetcher::new().items("q0", &[]));
    let (outcome, _) = run(&controller(llm, fetcher), "root", test_config()).await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed {
            cause: FailureCause::NoEvidence,
            ..
        }
    ));
}

// ============= Generator Failures =============

#[tokio::test]
async fn test_draft_recovers_within_retry_bound() {
    let llm = Arc::new(MockLLMClient::planning(&["a"]).failing(PromptKind::Draft, 2));
    let controller = controller(llm.clone(), Arc::new(MockFetcher::new()));

    let (outcome, events) = run(&controller, "root", test_config()).await;

    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert_eq!(llm.calls(PromptKind::Draft), 3);
    // Retries are invisible to observers
    assert!(warnings(&events).is_empty());
}

#[tokio::test]
async fn test_draft_exhausting_retries_fails_run() {
    let llm = Arc::new(MockLLMClient::planning(&["a"]).failing(PromptKind::Draft, 10));
    let controller = controller(llm.clone(), Arc::new(MockFetcher::new()));

    let (outcome, _) = run(&controller, "root", test_config()).await;

    match outcome {
        RunOutcome::Failed {
            stage,
            cause: FailureCause::Generation(_),
            last_draft,
        } => {
            assert_eq!(stage, Stage::Drafting);
            assert!(last_draft.is_none());
        }
        other => panic!("expected generation failure, got {other:?}"),
    }
    assert_eq!(llm.calls(PromptKind::Draft), 3);
}

#[tokio::test]
async fn test_revise_failure_keeps_last_draft_for_diagnostics() {
    let llm = Arc::new(
        MockLLMClient::planning(&["a"])
            .with_reply(PromptKind::Review, REVISE)
            .failing(PromptKind::Revise, 10),
    );
    let controller = controller(llm, Arc::new(MockFetcher::new()));

    let (outcome, _) = run(&controller, "root", test_config()).await;

    match outcome {
        RunOutcome::Failed {
            stage, last_draft, ..
        } => {
            assert_eq!(stage, Stage::Revising);
            assert_eq!(last_draft.unwrap().version, 0);
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

// ============= Planner Fallbacks =============

#[tokio::test]
async fn test_planner_failure_falls_back_to_root_query() {
    let llm = Arc::new(
        MockLLMClient::new()
            .failing(PromptKind::Plan, 10)
            .with_reply(PromptKind::Review, ACCEPT),
    );
    let fetcher = Arc::new(MockFetcher::new());
    let controller = controller(llm, fetcher.clone());

    let (outcome, events) = run(&controller, "solid state batteries", test_config()).await;

    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert_eq!(fetcher.calls(), vec!["solid state batteries"]);
    let warned = warnings(&events);
    assert_eq!(warned.len(), 1);
    assert!(matches!(
        warned[0].kind,
        EventKind::Warning {
            stage: Stage::Planning,
            ..
        }
    ));
}

#[tokio::test]
async fn test_fallback_model_plans_after_primary_gives_up() {
    let primary = Arc::new(
        MockLLMClient::new()
            .failing(PromptKind::Plan, 10)
            .with_reply(PromptKind::Review, ACCEPT),
    );
    let fallback = Arc::new(MockLLMClient::planning(&["cathode chemistry", "collection rates"]));
    let fetcher = Arc::new(MockFetcher::new());
    let controller = ResearchController::new(
        primary.clone(),
        fetcher.clone(),
        Arc::new(deepcite::research::MarkdownRenderer),
        ControllerOptions {
            defaults: test_config(),
            planner_fallback: Some(fallback.clone()),
            ..Default::default()
        },
    );

    let (outcome, events) = run(&controller, "battery recycling", test_config()).await;

    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert_eq!(primary.calls(PromptKind::Plan), test_config().max_attempts);
    assert_eq!(fallback.calls(PromptKind::Plan), 1);
    assert_eq!(fallback.calls(PromptKind::Draft), 0);
    let mut calls = fetcher.calls();
    calls.sort();
    assert_eq!(calls, vec!["cathode chemistry", "collection rates"]);
    assert!(warnings(&events).is_empty());
}

#[tokio::test]
async fn test_initial_search_results_reach_the_planner() {
    let llm = Arc::new(MockLLMClient::planning(&["a", "b"]));
    let fetcher = Arc::new(MockFetcher::new().items(
        "battery recycling",
        &[("https://news.example/lfp", "LFP recycling capacity doubled in 2024.")],
    ));
    let controller = controller(llm.clone(), fetcher.clone());
    let config = ResearchConfig {
        search_before_planning: true,
        ..test_config()
    };

    let (outcome, _) = run(&controller, "battery recycling", config).await;

    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert_eq!(fetcher.calls()[0], "battery recycling");
    assert_eq!(fetcher.calls().len(), 3);
    let plan_prompt = &llm.prompts(PromptKind::Plan)[0];
    assert!(plan_prompt.contains("Initial search results"));
    assert!(plan_prompt.contains("(https://news.example/lfp) LFP recycling capacity doubled"));

    // Only the planned sub-questions are evidence
    let RunOutcome::Completed { sources, .. } = outcome else {
        unreachable!()
    };
    assert!(sources.iter().all(|s| s.source_id != "https://news.example/lfp"));
}

#[tokio::test]
async fn test_failed_initial_search_still_plans() {
    let llm = Arc::new(MockLLMClient::planning(&["a"]));
    let fetcher = Arc::new(MockFetcher::new().fail("battery recycling"));
    let controller = controller(llm.clone(), fetcher.clone());
    let config = ResearchConfig {
        search_before_planning: true,
        ..test_config()
    };

    let (outcome, events) = run(&controller, "battery recycling", config).await;

    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert_eq!(fetcher.calls(), vec!["battery recycling", "a"]);
    assert!(!llm.prompts(PromptKind::Plan)[0].contains("Initial search results"));
    assert!(warnings(&events).is_empty());
}

#[tokio::test]
async fn test_plan_truncated_to_max_sub_questions() {
    let llm = Arc::new(MockLLMClient::planning(&["a", "b", "c", "d", "e", "f"]));
    let fetcher = Arc::new(MockFetcher::new());
    let controller = controller(llm, fetcher.clone());
    let config = ResearchConfig {
        max_sub_questions: 3,
        ..test_config()
    };

    let (_, events) = run(&controller, "root", config).await;

    assert_eq!(fetcher.calls().len(), 3);
    let planned = events.iter().find_map(|e| match &e.kind {
        EventKind::PartialResult(PartialResult::SubQuestionsPlanned { questions }) => {
            Some(questions.clone())
        }
        _ => None,
    });
    assert_eq!(planned.unwrap(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_non_english_query_is_translated_for_search() {
    let llm = Arc::new(
        MockLLMClient::new()
            .with_reply(
                PromptKind::Translate,
                r#"{"language": "German", "is_english": false,
                    "english_translation": "How does battery recycling work in Austria?",
                    "search_optimized_query": "battery recycling Austria"}"#,
            )
            .with_reply(PromptKind::Plan, "I could not come up with queries:")
            .with_reply(PromptKind::Review, ACCEPT),
    );
    let fetcher = Arc::new(MockFetcher::new());
    let controller = controller(llm.clone(), fetcher.clone());
    let config = ResearchConfig {
        translate_queries: true,
        ..test_config()
    };

    let query = "Wie funktioniert Batterierecycling in Österreich?";
    let (outcome, _) = run(&controller, query, config).await;

    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert_eq!(llm.calls(PromptKind::Translate), 1);
    assert_eq!(fetcher.calls(), vec!["battery recycling Austria"]);
}

// ============= Event Ordering =============

#[tokio::test]
async fn test_concurrent_branches_get_unique_increasing_sequences() {
    const BRANCHES: usize = 24;
    let questions: Vec<String> = (0..BRANCHES).map(|i| format!("branch {i}")).collect();
    let refs: Vec<&str> = questions.iter().map(String::as_str).collect();

    let mut rng = rand::rng();
    let mut fetcher = MockFetcher::new();
    for (i, q) in questions.iter().enumerate() {
        let delay = Duration::from_millis(rng.random_range(0..40));
        if i % 5 == 0 {
            fetcher = fetcher.fail(q);
        } else {
            let source = format!("https://b{i}.example");
            fetcher = fetcher.delayed(q, delay, &[(&source, "fact")]);
        }
    }

    let llm = Arc::new(MockLLMClient::planning(&refs));
    let controller = controller(llm, Arc::new(fetcher));
    let config = ResearchConfig {
        max_sub_questions: BRANCHES,
        ..test_config()
    };

    let id = controller.submit("root", config).unwrap();
    // Two observers: one attached immediately, one after the run ends
    let live: Vec<_> = controller.subscribe(id).unwrap().collect().await;
    let replayed: Vec<_> = controller.subscribe(id).unwrap().collect().await;

    let sequences: Vec<u64> = live.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (0..live.len() as u64).collect::<Vec<_>>());
    assert_eq!(live, replayed);

    let gathered = live
        .iter()
        .filter(|e| {
            matches!(
                e.kind,
                EventKind::PartialResult(PartialResult::EvidenceGathered { .. })
            )
        })
        .count();
    assert_eq!(gathered + warnings(&live).len(), BRANCHES);
}

#[tokio::test]
async fn test_concurrent_tasks_have_independent_sequences() {
    let llm = Arc::new(MockLLMClient::planning(&["a", "b"]));
    let controller = controller(llm, Arc::new(MockFetcher::new()));

    let ids: Vec<_> = (0..4)
        .map(|i| controller.submit(&format!("query {i}"), test_config()).unwrap())
        .collect();

    for id in ids {
        let events: Vec<_> = controller.subscribe(id).unwrap().collect().await;
        assert!(events.iter().all(|e| e.task_id == id));
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (0..events.len() as u64).collect::<Vec<_>>());
        assert!(events.last().unwrap().is_terminal());
    }
}

// ============= Cancellation =============

#[tokio::test]
async fn test_cancel_mid_fanout() {
    let per_call_timeout = Duration::from_secs(2);
    let llm = Arc::new(MockLLMClient::planning(&["slow 1", "slow 2", "slow 3"]));
    let fetcher = MockFetcher::new()
        .delayed("slow 1", Duration::from_secs(30), &[("s", "t")])
        .delayed("slow 2", Duration::from_secs(30), &[("s", "t")])
        .delayed("slow 3", Duration::from_secs(30), &[("s", "t")]);
    let controller = controller(llm.clone(), Arc::new(fetcher));
    let config = ResearchConfig {
        per_call_timeout,
        ..test_config()
    };

    let id = controller.submit("root", config).unwrap();
    let mut stream = controller.subscribe(id).unwrap();

    // Wait until gathering is under way
    let mut seen = Vec::new();
    while let Some(event) = stream.next().await {
        let gathering = matches!(event.kind, EventKind::StageStarted { stage: Stage::Gathering });
        seen.push(event);
        if gathering {
            break;
        }
    }

    let cancelled_at = Instant::now();
    assert!(controller.cancel(id).unwrap());
    let after: Vec<_> = stream.collect().await;
    assert!(cancelled_at.elapsed() < per_call_timeout);

    assert!(after.iter().all(|e| !matches!(e.kind, EventKind::StageStarted { .. })));
    match &after.last().unwrap().kind {
        EventKind::Terminal { state, .. } => assert_eq!(*state, Stage::Cancelled),
        other => panic!("expected terminal event, got {other:?}"),
    }

    assert_eq!(
        controller.wait(id).await.unwrap(),
        RunOutcome::Cancelled {
            stage: Stage::Gathering
        }
    );
    assert_eq!(llm.calls(PromptKind::Draft), 0);
    assert!(!controller.cancel(id).unwrap());
}

#[tokio::test]
async fn test_cancel_during_generation() {
    let llm = Arc::new(
        MockLLMClient::planning(&["a"]).with_delay(Duration::from_millis(200)),
    );
    let controller = controller(llm, Arc::new(MockFetcher::new()));

    let id = controller.submit("root", test_config()).unwrap();
    controller.cancel(id).unwrap();
    let outcome = controller.wait(id).await.unwrap();

    assert!(matches!(outcome, RunOutcome::Cancelled { .. }));
    let events = controller.events(id).unwrap();
    assert!(events.last().unwrap().is_terminal());
}

// ============= Deduplication =============

#[tokio::test]
async fn test_overlapping_evidence_kept_once_from_lowest_index() {
    let llm = Arc::new(MockLLMClient::planning(&["first", "second"]).echoing(PromptKind::Draft));
    let fetcher = MockFetcher::new()
        .delayed(
            "first",
            Duration::from_millis(40),
            &[
                ("https://shared.example", "Shared finding."),
                ("https://one.example", "Only in first."),
            ],
        )
        .items(
            "second",
            &[
                ("https://shared.example", "  shared   FINDING. "),
                ("https://two.example", "Only in second."),
            ],
        );
    let controller = controller(llm, Arc::new(fetcher));

    let (outcome, events) = run(&controller, "root", test_config()).await;

    let aggregated = events.iter().find_map(|e| match e.kind {
        EventKind::PartialResult(PartialResult::ContextAggregated { items, sources }) => {
            Some((items, sources))
        }
        _ => None,
    });
    assert_eq!(aggregated, Some((3, 3)));

    match outcome {
        RunOutcome::Completed {
            final_draft,
            sources,
            ..
        } => {
            assert_eq!(final_draft.body.matches("Shared finding.").count(), 1);
            assert!(!final_draft.body.contains("FINDING"));
            assert!(final_draft.body.contains("[1] (https://shared.example) Shared finding."));
            assert_eq!(sources[0].source_id, "https://shared.example");
            assert_eq!(sources[0].sub_question, 0);
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

// ============= Panics =============

#[rstest]
#[case(PromptKind::Plan, Stage::Planning)]
#[case(PromptKind::Draft, Stage::Drafting)]
#[case(PromptKind::Review, Stage::Reviewing)]
#[tokio::test]
async fn test_generator_panic_fails_run(#[case] kind: PromptKind, #[case] stage: Stage) {
    let llm = Arc::new(MockLLMClient::planning(&["a"]).panicking(kind));
    let controller = controller(llm, Arc::new(MockFetcher::new()));

    let id = controller.submit("root", test_config()).unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), controller.wait(id))
        .await
        .expect("run never reached a terminal event")
        .unwrap();

    match outcome {
        RunOutcome::Failed {
            stage: failed_stage,
            cause: FailureCause::Internal(message),
            ..
        } => {
            assert_eq!(failed_stage, stage);
            assert!(message.contains("panicked"));
        }
        other => panic!("expected internal failure, got {other:?}"),
    }

    let events = controller.events(id).unwrap();
    assert!(events.last().unwrap().is_terminal());
    assert!(events.iter().any(|e| matches!(e.kind, EventKind::Error { .. })));
    assert_eq!(controller.active_tasks(), 0);
}

// ============= Publishing =============

struct BrokenRenderer;

#[async_trait]
impl ReportRenderer for BrokenRenderer {
    async fn render(&self, _text: &str) -> Result<Deliverable, RenderError> {
        Err(RenderError::Failed("template engine offline".to_string()))
    }
}

struct PanickingRenderer;

#[async_trait]
impl ReportRenderer for PanickingRenderer {
    async fn render(&self, _text: &str) -> Result<Deliverable, RenderError> {
        panic!("renderer bug")
    }
}

#[tokio::test]
async fn test_renderer_panic_fails_in_publishing() {
    let controller = ResearchController::new(
        Arc::new(MockLLMClient::planning(&["a"])),
        Arc::new(MockFetcher::new()),
        Arc::new(PanickingRenderer),
        ControllerOptions {
            defaults: test_config(),
            ..Default::default()
        },
    );

    let id = controller.submit("root", test_config()).unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), controller.wait(id))
        .await
        .expect("run never reached a terminal event")
        .unwrap();

    assert!(matches!(
        outcome,
        RunOutcome::Failed {
            stage: Stage::Publishing,
            cause: FailureCause::Internal(_),
            ..
        }
    ));
}

#[tokio::test]
async fn test_publish_failure_keeps_accepted_draft() {
    let controller = ResearchController::new(
        Arc::new(MockLLMClient::planning(&["a"])),
        Arc::new(MockFetcher::new()),
        Arc::new(BrokenRenderer),
        ControllerOptions {
            defaults: test_config(),
            ..Default::default()
        },
    );

    let (outcome, events) = run(&controller, "root", test_config()).await;

    match outcome {
        RunOutcome::Completed {
            final_draft,
            deliverable,
            publish_error,
            ..
        } => {
            assert!(deliverable.is_none());
            assert_eq!(final_draft.body, "Report body citing [1].");
            assert!(publish_error.unwrap().contains("template engine offline"));
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert!(
        events
            .iter()
            .any(|e| matches!(e.kind, EventKind::Error { stage: Stage::Publishing, .. }))
    );
}

#[tokio::test]
async fn test_evidence_helper_roundtrip() {
    let items = evidence(&[("https://a", "text")]);
    assert_eq!(items[0].source_id, "https://a");
    assert_eq!(items[0].text, "text");
}
