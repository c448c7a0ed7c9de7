mod common;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{NaiveDate, NaiveDateTime};
    use sim_config::SimConfig;
    use sim_core::{EventBus, SimClock, SimError, SimEvent};
    use sim_engine::{MomentContext, Simulation, SimulationBuilder};

    use crate::common::{
        FailingDialogue, RecordingActions, ScriptedAgent, ScriptedDialogue, agent_ref,
    };

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 1, 13)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn context(now: NaiveDateTime) -> (MomentContext, Arc<RecordingActions>) {
        let actions = Arc::new(RecordingActions::default());
        let ctx = MomentContext {
            clock: SimClock::new(now, 10),
            actions: actions.clone(),
            events: EventBus::default(),
            reflection_threshold: 200,
        };
        (ctx, actions)
    }

    fn simulation(config: &SimConfig, agents: &[&Arc<ScriptedAgent>]) -> Simulation {
        let builder = SimulationBuilder::new(config, ScriptedDialogue::new(vec![]));
        for agent in agents {
            builder.agents().register(agent_ref(agent)).unwrap();
        }
        builder.build()
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<SimEvent>) -> Vec<SimEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    // ── Retry Batches ──────────────────────────────────────────

    mod batch {
        use std::collections::HashMap;

        use parking_lot::Mutex;
        use sim_engine::{Failure, Pass, Pipeline, RetryBatch};

        use super::*;

        #[tokio::test]
        async fn test_pipe_failures_are_isolated() {
            let pipeline = Pipeline::new().pipe("times_ten", |i: u32| async move {
                if [2, 5, 7].contains(&i) {
                    Err(SimError::agent(i.to_string(), "times_ten failed"))
                } else {
                    Ok(i * 10)
                }
            });

            let reports = Mutex::new(Vec::new());
            let survivors = pipeline
                .run((0..10).collect(), &|failure: Failure<'_, u32>| {
                    assert_eq!(failure.stage, "times_ten");
                    assert_eq!(failure.items.len(), 10);
                    reports.lock().push(*failure.item);
                })
                .await;

            assert_eq!(survivors, vec![0, 10, 30, 40, 60, 80, 90]);
            assert_eq!(reports.into_inner(), vec![2, 5, 7]);
        }

        #[tokio::test]
        async fn test_peek_keeps_original_item() {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = seen.clone();
            let pipeline = Pipeline::new()
                .map(|i: u32| i + 1)
                .peek("record", move |i: u32| {
                    let sink = sink.clone();
                    async move {
                        sink.lock().push(i);
                        Ok(())
                    }
                })
                .discard_if(|i: &u32| i % 2 == 0);

            let survivors = pipeline.run(vec![1, 2, 3, 4], &|_: Failure<'_, u32>| {}).await;
            assert_eq!(survivors, vec![3, 5]);
            let mut seen = seen.lock().clone();
            seen.sort();
            assert_eq!(seen, vec![2, 3, 4, 5]);
        }

        #[tokio::test]
        async fn test_discard_is_not_reported() {
            let pipeline = Pipeline::new().discard_if(|i: &u32| *i > 1);
            let reports = Mutex::new(0);
            let survivors = pipeline
                .run(vec![0, 1, 2, 3], &|_: Failure<'_, u32>| *reports.lock() += 1)
                .await;
            assert_eq!(survivors, vec![0, 1]);
            assert_eq!(*reports.lock(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn test_stages_are_full_barriers() {
            let log = Arc::new(Mutex::new(Vec::new()));
            let (first, second) = (log.clone(), log.clone());
            let pipeline = Pipeline::new()
                .peek("slow", move |i: u64| {
                    let log = first.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(100 * (4 - i))).await;
                        log.lock().push(format!("a{i}"));
                        Ok(())
                    }
                })
                .peek("fast", move |i: u64| {
                    let log = second.clone();
                    async move {
                        log.lock().push(format!("b{i}"));
                        Ok(())
                    }
                });

            pipeline.run(vec![1, 2, 3], &|_: Failure<'_, u64>| {}).await;
            let log = log.lock().clone();
            assert_eq!(log.len(), 6);
            assert!(log[..3].iter().all(|e| e.starts_with('a')));
            assert!(log[3..].iter().all(|e| e.starts_with('b')));
            // Stage one ran concurrently: shortest sleep finished first
            assert_eq!(log[0], "a3");
        }

        #[tokio::test]
        async fn test_retry_pass_over_failed_subset() {
            let attempts: Arc<Mutex<HashMap<u32, u32>>> = Arc::default();
            let counter = attempts.clone();
            let pipeline = Pipeline::new().peek("flaky", move |i: u32| {
                let counter = counter.clone();
                async move {
                    let attempt = {
                        let mut counter = counter.lock();
                        let n = counter.entry(i).or_insert(0);
                        *n += 1;
                        *n
                    };
                    let transient = [1, 3].contains(&i) && attempt == 1;
                    let permanent = i == 4;
                    if transient || permanent {
                        Err(SimError::agent(i.to_string(), "boom"))
                    } else {
                        Ok(())
                    }
                }
            });

            let reports = Mutex::new(Vec::new());
            let outcome = RetryBatch::new(pipeline)
                .run((0..6).collect(), &|failure: Failure<'_, u32>, pass: Pass| {
                    reports.lock().push((*failure.item, pass));
                })
                .await;

            assert_eq!(outcome.survivors, vec![0, 2, 5]);
            assert_eq!(outcome.recovered, vec![1, 3]);
            assert_eq!(outcome.failed, vec![4]);
            assert!(!outcome.is_clean());

            let reports = reports.into_inner();
            assert_eq!(reports.iter().filter(|(i, _)| *i == 4).count(), 2);
            assert_eq!(reports.iter().filter(|(i, _)| *i == 1).count(), 1);
            assert!(reports.contains(&(4, Pass::First)));
            assert!(reports.contains(&(4, Pass::Retry)));
            assert_eq!(attempts.lock()[&4], 2);
            assert_eq!(attempts.lock()[&0], 1);
        }

        #[tokio::test]
        async fn test_clean_batch_skips_retry() {
            let pipeline = Pipeline::new().peek("ok", |_: u32| async { Ok(()) });
            let outcome = RetryBatch::new(pipeline)
                .run(vec![1, 2], &|_: Failure<'_, u32>, _: Pass| panic!("no failures expected"))
                .await;
            assert!(outcome.is_clean());
            assert_eq!(outcome.survivors, vec![1, 2]);
        }
    }

    // ── Moment Classification ──────────────────────────────────

    mod classifier {
        use chrono::NaiveTime;
        use sim_engine::{Moment, MomentClassifier};

        use super::*;

        #[test]
        fn test_day_start_boundary_crossed_twice() {
            let mut classifier = MomentClassifier::new(NaiveTime::from_hms_opt(7, 0, 0).unwrap());
            let day_one = at(7, 0);
            let day_two = day_one + chrono::Duration::days(1);

            for instant in [day_one, day_two] {
                assert_eq!(classifier.classify(instant), Moment::Reflective);
                assert_eq!(classifier.classify(instant), Moment::Proactive);
                assert_eq!(classifier.classify(instant), Moment::Reactive);
                assert_eq!(classifier.classify(instant), Moment::Reactive);
                let later = instant + chrono::Duration::minutes(10);
                assert_eq!(classifier.classify(later), Moment::Reactive);
            }
        }

        #[test]
        fn test_full_hour_is_proactive_once() {
            let mut classifier = MomentClassifier::new(NaiveTime::from_hms_opt(7, 0, 0).unwrap());
            assert_eq!(classifier.classify(at(8, 0)), Moment::Proactive);
            assert_eq!(classifier.classify(at(8, 0)), Moment::Reactive);
            assert_eq!(classifier.classify(at(8, 10)), Moment::Reactive);
            assert_eq!(classifier.classify(at(9, 0)), Moment::Proactive);
        }

        #[test]
        fn test_day_start_off_the_hour() {
            let mut classifier = MomentClassifier::new(NaiveTime::from_hms_opt(6, 30, 0).unwrap());
            assert_eq!(classifier.classify(at(6, 30)), Moment::Reflective);
            assert_eq!(classifier.classify(at(6, 30)), Moment::Reactive);
        }

        #[test]
        fn test_only_reactive_elapses_time() {
            assert!(Moment::Reactive.elapses_time());
            assert!(!Moment::Proactive.elapses_time());
            assert!(!Moment::Reflective.elapses_time());
        }
    }

    // ── Reactive Dispatch ──────────────────────────────────────

    mod reactive {
        use sim_core::Plan;
        use sim_engine::Moment;

        use super::*;

        #[tokio::test]
        async fn test_stage_order() {
            let (ctx, actions) = context(at(7, 10));
            let ada = ScriptedAgent::new("Ada", "Cafe").shared();

            let report = Moment::Reactive.elapse(vec![agent_ref(&ada)], &ctx).await.unwrap();

            assert_eq!(ada.call_log(), vec!["observe", "plan_moment", "plan_place"]);
            assert_eq!(report.agents, 1);
            assert!(report.failed.is_empty());
            assert_eq!(actions.for_agent("Ada"), vec!["idle"]);
        }

        #[tokio::test]
        async fn test_conversing_agents_are_skipped_but_logged() {
            let (ctx, actions) = context(at(7, 10));
            let ada = ScriptedAgent::new("Ada", "Cafe").shared();
            let bo = ScriptedAgent::new("Bo", "Cafe").shared();
            {
                use sim_core::SimAgent;
                bo.set_in_conversation(true);
                bo.set_current_action("conversing with Cy".into());
            }

            Moment::Reactive
                .elapse(vec![agent_ref(&ada), agent_ref(&bo)], &ctx)
                .await
                .unwrap();

            assert!(bo.call_log().is_empty());
            assert_eq!(ada.calls("observe"), 1);
            assert_eq!(actions.for_agent("Bo"), vec!["conversing with Cy"]);
            assert_eq!(actions.entries().len(), 2);
        }

        #[tokio::test]
        async fn test_failure_falls_back_to_hourly_plan() {
            let (ctx, actions) = context(at(7, 10));
            let mut events = ctx.events.subscribe();
            let plan = Plan::default().with_hourly("Brew coffee\nRead paper\nWalk");
            let ada = ScriptedAgent::new("Ada", "Cafe")
                .with_plan(plan)
                .failing("observe", 1)
                .shared();
            let bo = ScriptedAgent::new("Bo", "Cafe").shared();

            let report = Moment::Reactive
                .elapse(vec![agent_ref(&ada), agent_ref(&bo)], &ctx)
                .await
                .unwrap();

            assert_eq!(report.failed, vec!["Ada".to_string()]);
            assert_eq!(ada.call_log(), vec!["observe"]);
            assert_eq!(bo.call_log(), vec!["observe", "plan_moment", "plan_place"]);
            assert_eq!(actions.for_agent("Ada"), vec!["Read paper"]);

            let failures: Vec<_> = drain(&mut events)
                .into_iter()
                .filter(|e| matches!(e, SimEvent::AgentFailed { retry: false, .. }))
                .collect();
            assert_eq!(failures.len(), 1);
        }

        #[tokio::test]
        async fn test_failure_without_plan_keeps_action() {
            let (ctx, actions) = context(at(7, 10));
            let ada = ScriptedAgent::new("Ada", "Cafe").failing("plan_place", 1).shared();

            Moment::Reactive.elapse(vec![agent_ref(&ada)], &ctx).await.unwrap();

            assert_eq!(ada.calls("reflect"), 0);
            assert_eq!(actions.for_agent("Ada"), vec!["idle"]);
        }

        #[tokio::test]
        async fn test_reflects_when_threshold_reached() {
            let (ctx, _) = context(at(7, 10));
            let mut events = ctx.events.subscribe();
            let ada = ScriptedAgent::new("Ada", "Cafe").observing(250).shared();

            Moment::Reactive.elapse(vec![agent_ref(&ada)], &ctx).await.unwrap();

            use sim_core::SimAgent;
            assert_eq!(ada.calls("reflect"), 1);
            assert_eq!(ada.importance().value(), 0);
            assert!(drain(&mut events).contains(&SimEvent::AgentReflected { agent: "Ada".into() }));
        }
    }

    // ── Proactive & Reflective Dispatch ────────────────────────

    mod proactive {
        use sim_core::Plan;
        use sim_engine::Moment;

        use super::*;

        #[tokio::test]
        async fn test_plans_day_only_when_missing() {
            let (ctx, _) = context(at(8, 0));
            let planned = ScriptedAgent::new("Ada", "Cafe")
                .with_plan(Plan::from_daily("8:00) Work"))
                .shared();
            let fresh = ScriptedAgent::new("Bo", "Cafe").shared();

            let report = Moment::Proactive
                .elapse(vec![agent_ref(&planned), agent_ref(&fresh)], &ctx)
                .await
                .unwrap();

            assert!(report.failed.is_empty());
            assert_eq!(planned.call_log(), vec!["plan_rest_of_hour"]);
            assert_eq!(fresh.call_log(), vec!["plan_day", "plan_rest_of_hour"]);
        }

        #[tokio::test]
        async fn test_midnight_replans_everyone() {
            let (ctx, _) = context(at(0, 0));
            let planned = ScriptedAgent::new("Ada", "Cafe")
                .with_plan(Plan::from_daily("8:00) Work"))
                .shared();

            Moment::Proactive.elapse(vec![agent_ref(&planned)], &ctx).await.unwrap();

            assert_eq!(planned.calls("plan_day"), 1);
        }

        #[tokio::test]
        async fn test_transient_failure_recovers_on_retry() {
            let (ctx, _) = context(at(8, 0));
            let ada = ScriptedAgent::new("Ada", "Cafe").failing("plan_day", 1).shared();

            let report = Moment::Proactive.elapse(vec![agent_ref(&ada)], &ctx).await.unwrap();

            assert_eq!(ada.call_log(), vec!["plan_day", "plan_day", "plan_rest_of_hour"]);
            assert_eq!(report.recovered, vec!["Ada".to_string()]);
            assert!(report.failed.is_empty());
        }

        #[tokio::test]
        async fn test_persistent_failure_is_reported_twice() {
            let (ctx, _) = context(at(8, 0));
            let mut events = ctx.events.subscribe();
            let ada = ScriptedAgent::new("Ada", "Cafe")
                .failing("plan_rest_of_hour", u32::MAX)
                .shared();
            let bo = ScriptedAgent::new("Bo", "Cafe").shared();

            let report = Moment::Proactive
                .elapse(vec![agent_ref(&ada), agent_ref(&bo)], &ctx)
                .await
                .unwrap();

            assert_eq!(report.failed, vec!["Ada".to_string()]);
            assert_eq!(ada.calls("plan_rest_of_hour"), 2);
            assert_eq!(bo.calls("plan_rest_of_hour"), 1);

            let retries: Vec<bool> = drain(&mut events)
                .into_iter()
                .filter_map(|e| match e {
                    SimEvent::AgentFailed { retry, .. } => Some(retry),
                    _ => None,
                })
                .collect();
            assert_eq!(retries, vec![true, false]);
        }

        #[tokio::test]
        async fn test_reflective_synthesizes_with_retry() {
            let (ctx, actions) = context(at(7, 0));
            let ada = ScriptedAgent::new("Ada", "Cafe")
                .failing("synthesize_summary", 1)
                .shared();
            let bo = ScriptedAgent::new("Bo", "Cafe").shared();

            let report = Moment::Reflective
                .elapse(vec![agent_ref(&ada), agent_ref(&bo)], &ctx)
                .await
                .unwrap();

            assert_eq!(ada.calls("synthesize_summary"), 2);
            assert_eq!(bo.calls("synthesize_summary"), 1);
            assert_eq!(report.recovered, vec!["Ada".to_string()]);
            assert!(actions.entries().is_empty());
        }
    }

    // ── Scheduler ──────────────────────────────────────────────

    mod scheduler {
        use parking_lot::Mutex;
        use sim_engine::Moment;

        use super::*;

        #[tokio::test]
        async fn test_clock_advances_only_on_reactive_ticks() {
            let config = SimConfig::default();
            let ada = ScriptedAgent::new("Ada", "Cafe").shared();
            let bo = ScriptedAgent::new("Bo", "Park").shared();
            let mut sim = simulation(&config, &[&ada, &bo]);
            let handle = sim.handle();
            let start = handle.clock().now();

            let mut reactive = 0;
            for i in 0..100 {
                let moment = if i % 3 == 0 { Moment::Reactive } else { Moment::Proactive };
                if moment == Moment::Reactive {
                    reactive += 1;
                }
                sim.scheduler_mut().run_tick(moment).await;
            }

            assert_eq!(reactive, 34);
            assert_eq!(
                handle.clock().now() - start,
                chrono::Duration::minutes(10 * reactive)
            );
            assert_eq!(sim.scheduler_mut().ticks(), 100);
        }

        #[tokio::test]
        async fn test_tick_classifies_and_groups() {
            let config = SimConfig::default();
            let ada = ScriptedAgent::new("Ada", "Cafe").shared();
            let bo = ScriptedAgent::new("Bo", "Park").shared();
            let cy = ScriptedAgent::new("Cy", "Park").shared();
            let mut sim = simulation(&config, &[&ada, &bo, &cy]);

            let first = sim.scheduler_mut().tick().await;
            assert_eq!(first.moment, Moment::Reflective);
            assert_eq!(first.groups, 2);
            assert_eq!(sim.scheduler_mut().tick().await.moment, Moment::Proactive);
            assert_eq!(sim.scheduler_mut().tick().await.moment, Moment::Reactive);
            assert_eq!(sim.scheduler_mut().tick().await.moment, Moment::Reactive);

            assert_eq!(ada.calls("synthesize_summary"), 1);
            assert_eq!(cy.calls("plan_rest_of_hour"), 1);
            assert_eq!(bo.calls("observe"), 2);
        }

        #[tokio::test]
        async fn test_deferred_mutations_run_after_groups_in_order() {
            let config = SimConfig::default();
            let ada = ScriptedAgent::new("Ada", "Cafe").shared();
            let mut sim = simulation(&config, &[&ada]);
            let handle = sim.handle();

            let order = Arc::new(Mutex::new(Vec::new()));
            for n in 0..3 {
                let order = order.clone();
                let ada = ada.clone();
                handle.enqueue(move || {
                    order.lock().push((n, ada.calls("observe")));
                    Ok(())
                });
            }

            sim.scheduler_mut().run_tick(Moment::Reactive).await;
            assert_eq!(*order.lock(), vec![(0, 1), (1, 1), (2, 1)]);

            sim.scheduler_mut().run_tick(Moment::Reactive).await;
            assert_eq!(order.lock().len(), 3);
        }

        #[tokio::test]
        async fn test_mutation_errors_reach_error_channel_once() {
            let config = SimConfig::default();
            let mut sim = simulation(&config, &[]);
            let handle = sim.handle();

            handle.enqueue(|| Err(SimError::Config("bad mutation".into())));
            let report = sim.scheduler_mut().run_tick(Moment::Reactive).await;

            assert_eq!(report.errors, 1);
            assert!(matches!(handle.poll_error(), Some(SimError::MutationFailed(_))));
            assert!(handle.poll_error().is_none());
        }

        #[tokio::test]
        async fn test_panicking_mutation_is_captured() {
            let config = SimConfig::default();
            let mut sim = simulation(&config, &[]);
            let handle = sim.handle();

            handle.enqueue(|| panic!("operator bug"));
            sim.scheduler_mut().run_tick(Moment::Reactive).await;

            match handle.poll_error() {
                Some(SimError::MutationFailed(reason)) => assert!(reason.contains("operator bug")),
                other => panic!("expected mutation failure, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_group_panic_is_captured_and_ticking_continues() {
            let config = SimConfig::default();
            let ada = ScriptedAgent::new("Ada", "Cafe").panicking("observe").shared();
            let bo = ScriptedAgent::new("Bo", "Park").shared();
            let mut sim = simulation(&config, &[&ada, &bo]);
            let handle = sim.handle();
            let mut events = handle.events().subscribe();

            let report = sim.scheduler_mut().run_tick(Moment::Reactive).await;
            assert_eq!(report.errors, 1);
            assert!(matches!(handle.poll_error(), Some(SimError::TickPanicked { tick: 1, .. })));
            assert_eq!(bo.calls("observe"), 1);
            assert!(drain(&mut events).iter().any(|e| matches!(e, SimEvent::TickFailed { tick: 1, .. })));

            sim.scheduler_mut().run_tick(Moment::Reactive).await;
            assert_eq!(bo.calls("observe"), 2);
            assert_eq!(sim.scheduler_mut().ticks(), 2);
        }

        #[tokio::test(start_paused = true)]
        async fn test_run_stops_after_tick_limit() {
            let mut config = SimConfig::default();
            config.scheduler.tick_period_ms = 1000;
            let ada = ScriptedAgent::new("Ada", "Cafe").shared();
            let sim = simulation(&config, &[&ada]);

            let running = sim.start(Some(5));
            while !running.is_finished() {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            let summary = running.shutdown().await.unwrap();

            assert_eq!(summary.ticks, 5);
            assert_eq!(summary.agents, 1);
            assert_eq!(summary.conversations, 0);
            assert_eq!(ada.calls("synthesize_summary"), 1);
            // Ticks 3, 4 and 5 were Reactive
            assert_eq!(ada.calls("observe"), 3);
            assert_eq!(summary.ended_at - summary.started_at, chrono::Duration::minutes(30));
        }

        #[tokio::test(start_paused = true)]
        async fn test_shutdown_stops_future_ticks() {
            let mut config = SimConfig::default();
            config.scheduler.tick_period_ms = 1000;
            let ada = ScriptedAgent::new("Ada", "Cafe").shared();
            let sim = simulation(&config, &[&ada]);

            let running = sim.start(None);
            tokio::time::sleep(Duration::from_millis(2500)).await;
            let summary = running.shutdown().await.unwrap();
            let ticks = summary.ticks;
            assert!(ticks >= 2, "expected at least two ticks, got {ticks}");

            tokio::time::sleep(Duration::from_secs(10)).await;
            assert_eq!(ada.calls("synthesize_summary"), 1);
            assert_eq!(ada.calls("observe") as u64, ticks - 2);
        }
    }

    // ── Conversations ──────────────────────────────────────────

    mod conversation {
        use sim_core::SimAgent;
        use sim_engine::{ConversationLoop, ConversationRegistry};
        use tokio_util::sync::CancellationToken;

        use super::*;

        fn registry(script: Vec<Option<bool>>) -> Arc<ConversationRegistry> {
            Arc::new(ConversationRegistry::new(ScriptedDialogue::new(script), EventBus::default()))
        }

        fn pair() -> (Arc<ScriptedAgent>, Arc<ScriptedAgent>) {
            (
                ScriptedAgent::new("Ada", "Cafe").shared(),
                ScriptedAgent::new("Bo", "Cafe").shared(),
            )
        }

        fn conversation_loop(registry: &Arc<ConversationRegistry>, max_failures: u32) -> ConversationLoop {
            ConversationLoop::new(
                registry.clone(),
                EventBus::default(),
                max_failures,
                CancellationToken::new(),
            )
        }

        #[tokio::test]
        async fn test_start_marks_participants() {
            let registry = registry(vec![]);
            let (ada, bo) = pair();

            let id = registry.start(agent_ref(&ada), agent_ref(&bo)).await.unwrap();

            assert!(id.is_some());
            assert!(ada.is_in_conversation() && bo.is_in_conversation());
            assert_eq!(ada.current_action(), "conversing with Bo");
            assert_eq!(bo.current_action(), "conversing with Ada");
            assert_eq!(registry.len(), 1);
            assert_eq!(registry.total_started(), 1);
        }

        #[tokio::test]
        async fn test_busy_participant_is_refused() {
            let registry = registry(vec![]);
            let (ada, bo) = pair();
            let cy = ScriptedAgent::new("Cy", "Cafe").shared();

            registry.start(agent_ref(&ada), agent_ref(&bo)).await.unwrap();
            let second = registry.start(agent_ref(&cy), agent_ref(&bo)).await.unwrap();

            assert!(second.is_none());
            assert!(!cy.is_in_conversation());
            assert_eq!(registry.len(), 1);
        }

        #[tokio::test]
        async fn test_failed_open_leaves_participants_untouched() {
            let registry = Arc::new(ConversationRegistry::new(
                Arc::new(FailingDialogue),
                EventBus::default(),
            ));
            let (ada, bo) = pair();
            bo.set_current_action("reading".into());

            let result = registry.start(agent_ref(&ada), agent_ref(&bo)).await;

            assert!(matches!(result, Err(SimError::Conversation(_))));
            assert!(!ada.is_in_conversation() && !bo.is_in_conversation());
            assert_eq!(ada.current_action(), "idle");
            assert_eq!(bo.current_action(), "reading");
            assert!(registry.is_empty());
            assert_eq!(registry.total_started(), 0);
        }

        #[tokio::test]
        async fn test_talking_to_self_is_an_error() {
            let registry = registry(vec![]);
            let ada = ScriptedAgent::new("Ada", "Cafe").shared();
            let result = registry.start(agent_ref(&ada), agent_ref(&ada)).await;
            assert!(matches!(result, Err(SimError::Conversation(_))));
        }

        #[tokio::test]
        async fn test_waiting_consumer_wakes_on_add() {
            let registry = registry(vec![]);
            let waiter = {
                let registry = registry.clone();
                tokio::spawn(async move { registry.wait_for_active().await })
            };
            tokio::task::yield_now().await;
            assert!(!waiter.is_finished());

            let (ada, bo) = pair();
            registry.start(agent_ref(&ada), agent_ref(&bo)).await.unwrap();

            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter should wake")
                .unwrap();
        }

        #[tokio::test]
        async fn test_end_removes_and_releases() {
            let registry = registry(vec![Some(false), Some(true)]);
            let (ada, bo) = pair();
            registry.start(agent_ref(&ada), agent_ref(&bo)).await.unwrap();
            let looper = conversation_loop(&registry, 5);

            assert_eq!(looper.iterate().await, 1);
            assert_eq!(registry.len(), 1);
            assert_eq!(looper.iterate().await, 1);

            assert!(registry.snapshot().is_empty());
            assert!(!ada.is_in_conversation());
            assert!(!bo.is_in_conversation());
            assert_eq!(ada.current_action(), "Finishing conversation with Bo");
            assert_eq!(bo.current_action(), "Finishing conversation with Ada");

            let transcript = "Bo: line 1\nAda: line 2\n";
            assert_eq!(ada.transcripts(), vec![transcript]);
            assert_eq!(bo.transcripts(), vec![transcript]);
        }

        #[tokio::test]
        async fn test_failed_turn_keeps_speaker() {
            let registry = registry(vec![None, Some(false), Some(true)]);
            let (ada, bo) = pair();
            registry.start(agent_ref(&ada), agent_ref(&bo)).await.unwrap();
            let conversation = registry.snapshot().remove(0);

            assert!(conversation.converse().await.is_err());
            assert_eq!(conversation.failures(), 1);
            assert!(conversation.last_speaker().is_none());

            assert!(!conversation.converse().await.unwrap());
            assert_eq!(conversation.failures(), 0);
            assert_eq!(conversation.last_speaker().map(|a| a.name().to_string()), Some("Bo".into()));
            assert!(conversation.converse().await.unwrap());
            assert_eq!(conversation.transcript(), "Bo: line 1\nAda: line 2\n");
        }

        #[tokio::test]
        async fn test_stuck_conversation_is_evicted() {
            let events = EventBus::default();
            let registry = Arc::new(ConversationRegistry::new(
                ScriptedDialogue::new(vec![None, None, None, None]),
                events.clone(),
            ));
            let mut rx = events.subscribe();
            let (ada, bo) = pair();
            registry.start(agent_ref(&ada), agent_ref(&bo)).await.unwrap();
            let looper = ConversationLoop::new(registry.clone(), events, 3, CancellationToken::new());

            looper.iterate().await;
            looper.iterate().await;
            assert_eq!(registry.len(), 1);
            looper.iterate().await;

            assert!(registry.is_empty());
            assert!(!ada.is_in_conversation() && !bo.is_in_conversation());
            assert!(ada.transcripts().is_empty());
            assert!(drain(&mut rx)
                .iter()
                .any(|e| matches!(e, SimEvent::ConversationEvicted { failures: 3, .. })));
        }

        #[tokio::test]
        async fn test_zero_disables_eviction() {
            let registry = registry(vec![None; 8]);
            let (ada, bo) = pair();
            registry.start(agent_ref(&ada), agent_ref(&bo)).await.unwrap();
            let looper = conversation_loop(&registry, 0);

            for _ in 0..8 {
                looper.iterate().await;
            }
            assert_eq!(registry.len(), 1);
            assert!(ada.is_in_conversation());
        }

        #[tokio::test(start_paused = true)]
        async fn test_loop_backs_off_when_every_turn_fails() {
            let registry = registry(vec![None; 16]);
            let (ada, bo) = pair();
            registry.start(agent_ref(&ada), agent_ref(&bo)).await.unwrap();
            let conversation = registry.snapshot().remove(0);

            let shutdown = CancellationToken::new();
            let task = ConversationLoop::new(registry.clone(), EventBus::default(), 0, shutdown.clone())
                .with_failure_backoff(Duration::from_secs(1))
                .spawn();

            // Attempts at 0s, 1s and 2s
            tokio::time::sleep(Duration::from_millis(2500)).await;
            assert_eq!(conversation.failures(), 3);

            shutdown.cancel();
            task.await.unwrap();
            assert_eq!(registry.len(), 1);
        }

        #[tokio::test]
        async fn test_loop_runs_conversation_to_completion() {
            let events = EventBus::default();
            let registry = Arc::new(ConversationRegistry::new(
                ScriptedDialogue::new(vec![Some(false), Some(false), Some(true)]),
                events.clone(),
            ));
            let mut rx = events.subscribe();
            let shutdown = CancellationToken::new();
            let task = ConversationLoop::new(registry.clone(), events, 5, shutdown.clone()).spawn();

            let (ada, bo) = pair();
            registry.start(agent_ref(&ada), agent_ref(&bo)).await.unwrap();

            let ended = tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    match rx.recv().await {
                        Ok(SimEvent::ConversationEnded { turns, .. }) => break turns,
                        Ok(_) => continue,
                        Err(e) => panic!("event bus closed: {e}"),
                    }
                }
            })
            .await
            .expect("conversation should end");
            assert_eq!(ended, 3);

            shutdown.cancel();
            task.await.unwrap();
            assert!(registry.is_empty());
            assert!(!ada.is_in_conversation());
        }
    }

    // ── Agent Registry ─────────────────────────────────────────

    mod registry {
        use sim_core::SimAgent;
        use sim_engine::AgentRegistry;

        use super::*;

        #[test]
        fn test_names_are_unique() {
            let registry = AgentRegistry::new();
            let ada = ScriptedAgent::new("Ada", "Cafe").shared();
            registry.register(agent_ref(&ada)).unwrap();

            let twin = ScriptedAgent::new("Ada", "Park").shared();
            assert!(matches!(
                registry.register(agent_ref(&twin)),
                Err(SimError::Agent { .. })
            ));
            assert_eq!(registry.count(), 1);
        }

        #[test]
        fn test_groups_follow_current_location() {
            let registry = AgentRegistry::new();
            let ada = ScriptedAgent::new("Ada", "Park").shared();
            let bo = ScriptedAgent::new("Bo", "Cafe").shared();
            let cy = ScriptedAgent::new("Cy", "Park").shared();
            for agent in [&ada, &bo, &cy] {
                registry.register(agent_ref(agent)).unwrap();
            }

            let groups: Vec<(String, Vec<String>)> = registry
                .grouped_by_location()
                .into_iter()
                .map(|(l, g)| (l, g.iter().map(|a| a.name().to_string()).collect()))
                .collect();
            assert_eq!(
                groups,
                vec![
                    ("Cafe".to_string(), vec!["Bo".to_string()]),
                    ("Park".to_string(), vec!["Ada".to_string(), "Cy".to_string()]),
                ]
            );

            bo.set_location("Park".into());
            assert_eq!(registry.grouped_by_location().len(), 1);
            assert_eq!(registry.at_location("Park").len(), 3);
        }

        #[test]
        fn test_lookup() {
            let registry = AgentRegistry::new();
            assert!(registry.random().is_none());
            assert!(registry.is_empty());

            let ada = ScriptedAgent::new("Ada", "Cafe").shared();
            registry.register(agent_ref(&ada)).unwrap();
            assert_eq!(registry.random().map(|a| a.name().to_string()), Some("Ada".into()));
            assert!(registry.find("Ada").is_some());
            assert!(registry.find("Zed").is_none());
            assert_eq!(registry.names(), vec!["Ada".to_string()]);
        }
    }

    // ── World Map ──────────────────────────────────────────────

    mod world {
        use sim_config::{ItemConfig, LocationConfig, WorldConfig};
        use sim_engine::{Moment, WorldMap};

        use super::*;

        fn cafe_world() -> WorldConfig {
            WorldConfig {
                locations: vec![
                    LocationConfig {
                        name: "Cafe".into(),
                        items: vec![
                            ItemConfig {
                                name: "Coffee machine".into(),
                                status: "idle".into(),
                            },
                            ItemConfig {
                                name: "oven".into(),
                                status: "baking bread".into(),
                            },
                        ],
                    },
                    "Park".into(),
                ],
            }
        }

        #[test]
        fn test_items_start_with_configured_status() {
            let world = WorldMap::from_config(&cafe_world());
            assert_eq!(world.len(), 2);
            assert_eq!(world.location_names(), vec!["Cafe".to_string(), "Park".to_string()]);

            let items = world.items_at("Cafe");
            assert_eq!(items.len(), 2);
            assert_eq!(items[1].name, "oven");
            assert_eq!(items[1].status, "baking bread");
            assert!(world.items_at("Park").is_empty());
            assert!(world.items_at("Atlantis").is_empty());
        }

        #[test]
        fn test_status_update_matches_loosely_named_items() {
            let world = WorldMap::from_config(&cafe_world());
            world.set_item_status("Cafe", "  coffee MACHINE ", "brewing").unwrap();

            let machine = &world.items_at("Cafe")[0];
            assert_eq!(machine.name, "Coffee machine");
            assert_eq!(machine.status, "brewing");
        }

        #[test]
        fn test_unknown_location_or_item_is_an_error() {
            let world = WorldMap::from_config(&cafe_world());
            assert!(matches!(
                world.set_item_status("Atlantis", "oven", "off"),
                Err(SimError::World(_))
            ));
            assert!(matches!(
                world.set_item_status("Park", "oven", "off"),
                Err(SimError::World(_))
            ));
            assert_eq!(world.items_at("Cafe")[1].status, "baking bread");
        }

        #[tokio::test]
        async fn test_handle_status_change_waits_for_drain() {
            let mut config = SimConfig::default();
            config.world = cafe_world();
            let mut sim = simulation(&config, &[]);
            let handle = sim.handle();

            handle.set_item_status("Cafe", "oven", "off");
            assert_eq!(handle.world().items_at("Cafe")[1].status, "baking bread");

            let report = sim.scheduler_mut().run_tick(Moment::Reactive).await;
            assert_eq!(report.errors, 0);
            assert_eq!(handle.world().items_at("Cafe")[1].status, "off");
        }

        #[tokio::test]
        async fn test_handle_status_change_for_missing_item_fails_the_mutation() {
            let mut config = SimConfig::default();
            config.world = cafe_world();
            let mut sim = simulation(&config, &[]);
            let handle = sim.handle();

            handle.set_item_status("Park", "swing", "moving");
            sim.scheduler_mut().run_tick(Moment::Reactive).await;

            match handle.poll_error() {
                Some(SimError::MutationFailed(reason)) => assert!(reason.contains("swing")),
                other => panic!("expected mutation failure, got {other:?}"),
            }
        }
    }

    // ── End to End ─────────────────────────────────────────────

    mod end_to_end {
        use sim_core::SimAgent;
        use sim_engine::Moment;

        use super::*;

        #[tokio::test]
        async fn test_accumulated_importance_triggers_one_reflection() {
            let config = SimConfig::default();
            let a = ScriptedAgent::new("A", "Cafe").observing(15).shared();
            let b = ScriptedAgent::new("B", "Cafe").shared();
            let mut sim = simulation(&config, &[&a, &b]);
            let handle = sim.handle();
            let mut events = handle.events().subscribe();

            for tick in 1..=20u32 {
                sim.scheduler_mut().run_tick(Moment::Reactive).await;
                match tick {
                    1..=13 => {
                        assert_eq!(a.calls("reflect"), 0, "tick {tick}");
                        assert_eq!(a.importance().value(), 15 * tick);
                    }
                    14 => {
                        assert_eq!(a.calls("reflect"), 1);
                        assert_eq!(a.importance().value(), 0);
                    }
                    _ => assert_eq!(a.calls("reflect"), 1),
                }
            }

            assert_eq!(a.importance().value(), 15 * 6);
            assert_eq!(b.calls("reflect"), 0);
            let reflected: Vec<_> = drain(&mut events)
                .into_iter()
                .filter(|e| matches!(e, SimEvent::AgentReflected { .. }))
                .collect();
            assert_eq!(reflected, vec![SimEvent::AgentReflected { agent: "A".into() }]);
        }
    }
}
