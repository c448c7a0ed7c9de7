//! # Moments
//!
//! Every tick is classified as one of three moments, each with its own
//! per-agent behavior sequence:
//!
//! | Moment     | Fires                           | Sequence                                   | Advances time |
//! |------------|---------------------------------|--------------------------------------------|---------------|
//! | Reflective | once at the day-start instant   | synthesize summary                         | no            |
//! | Proactive  | once at every full hour         | plan day (if needed), plan rest of hour    | no            |
//! | Reactive   | every other tick                | observe, plan moment, plan place, reflect  | yes           |
//!
//! Reflective and Proactive run through a [`RetryBatch`]. Reactive is a single
//! pass whose failure handler falls the agent back to its hourly plan.

use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use sim_core::{ActionLog, AgentRef, EventBus, Result, SimClock, SimError, SimEvent};
use tracing::{debug, error, info, warn};

use crate::batch::{Failure, Pass, Pipeline, RetryBatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Moment {
    Reflective,
    Proactive,
    Reactive,
}

impl Moment {
    /// Only Reactive ticks move simulated time forward.
    pub fn elapses_time(self) -> bool {
        matches!(self, Moment::Reactive)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Moment::Reflective => "reflective",
            Moment::Proactive => "proactive",
            Moment::Reactive => "reactive",
        }
    }

    /// Run this moment's behavior sequence over one location group.
    pub async fn elapse(self, group: Vec<AgentRef>, ctx: &MomentContext) -> Result<MomentReport> {
        debug!(moment = self.as_str(), agents = group.len(), "elapsing moment");
        match self {
            Moment::Reflective => Ok(elapse_reflective(group, ctx).await),
            Moment::Proactive => Ok(elapse_proactive(group, ctx).await),
            Moment::Reactive => elapse_reactive(group, ctx).await,
        }
    }
}

impl fmt::Display for Moment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides which moment a tick is.
///
/// Remembers the last instant each non-Reactive moment fired, so a moment
/// fires at most once per instant and is armed again as soon as time moves on.
/// At the day-start instant the order is Reflective, Proactive, Reactive.
#[derive(Debug, Clone)]
pub struct MomentClassifier {
    day_start: NaiveTime,
    last_reflective: Option<NaiveDateTime>,
    last_proactive: Option<NaiveDateTime>,
}

impl MomentClassifier {
    pub fn new(day_start: NaiveTime) -> Self {
        Self {
            day_start,
            last_reflective: None,
            last_proactive: None,
        }
    }

    pub fn classify(&mut self, now: NaiveDateTime) -> Moment {
        if now.time() == self.day_start && self.last_reflective != Some(now) {
            self.last_reflective = Some(now);
            return Moment::Reflective;
        }
        if now.minute() == 0 && now.second() == 0 && self.last_proactive != Some(now) {
            self.last_proactive = Some(now);
            return Moment::Proactive;
        }
        Moment::Reactive
    }
}

/// Shared collaborators of every moment dispatch.
#[derive(Clone)]
pub struct MomentContext {
    pub clock: SimClock,
    pub actions: Arc<dyn ActionLog>,
    pub events: EventBus,
    /// Accumulated importance at which a Reactive tick makes an agent reflect.
    pub reflection_threshold: u32,
}

/// Outcome of one group's dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MomentReport {
    pub agents: usize,
    /// Agents that ended the dispatch failed, in the order they were reported.
    pub failed: Vec<String>,
    /// Agents that failed the first pass and recovered on retry.
    pub recovered: Vec<String>,
}

fn names(agents: &[AgentRef]) -> Vec<String> {
    agents.iter().map(|a| a.name().to_string()).collect()
}

fn report_retry_failure(
    moment: Moment,
    events: &EventBus,
    failure: Failure<'_, AgentRef>,
    pass: Pass,
) {
    let agent = failure.item.name();
    match pass {
        Pass::First => warn!(
            agent = %agent,
            moment = moment.as_str(),
            stage = failure.stage,
            error = %failure.error,
            "agent failed, retrying"
        ),
        Pass::Retry => error!(
            agent = %agent,
            moment = moment.as_str(),
            stage = failure.stage,
            error = %failure.error,
            "agent failed on retry, keeping last known state"
        ),
    }
    events.publish(SimEvent::AgentFailed {
        agent: agent.to_string(),
        moment: moment.as_str().into(),
        error: failure.error.to_string(),
        retry: pass == Pass::First,
    });
}

async fn run_with_retry(
    moment: Moment,
    pipeline: Pipeline<AgentRef>,
    group: Vec<AgentRef>,
    ctx: &MomentContext,
) -> MomentReport {
    let agents = group.len();
    let events = ctx.events.clone();
    let outcome = RetryBatch::new(pipeline)
        .run(group, &|failure, pass| report_retry_failure(moment, &events, failure, pass))
        .await;
    MomentReport {
        agents,
        failed: names(&outcome.failed),
        recovered: names(&outcome.recovered),
    }
}

async fn elapse_reflective(group: Vec<AgentRef>, ctx: &MomentContext) -> MomentReport {
    let pipeline = Pipeline::new().peek("synthesize_summary", |agent: AgentRef| async move {
        agent.synthesize_summary().await
    });
    run_with_retry(Moment::Reflective, pipeline, group, ctx).await
}

async fn elapse_proactive(group: Vec<AgentRef>, ctx: &MomentContext) -> MomentReport {
    let clock = ctx.clock.clone();
    let pipeline = Pipeline::new()
        .peek("plan_day", move |agent: AgentRef| {
            let replan = clock.is_midnight() || agent.plan().is_none_or(|p| !p.has_day_plan());
            async move {
                if replan {
                    agent.plan_day().await
                } else {
                    Ok(())
                }
            }
        })
        .peek("plan_rest_of_hour", |agent: AgentRef| async move {
            agent.plan_rest_of_hour(None).await
        });
    run_with_retry(Moment::Proactive, pipeline, group, ctx).await
}

async fn elapse_reactive(group: Vec<AgentRef>, ctx: &MomentContext) -> Result<MomentReport> {
    let threshold = ctx.reflection_threshold;
    let events = ctx.events.clone();
    let pipeline = Pipeline::new()
        .discard_if(|agent: &AgentRef| agent.is_in_conversation())
        .peek("observe", |agent: AgentRef| async move { agent.observe().await })
        .peek("plan_moment", |agent: AgentRef| async move {
            agent.plan_moment().await
        })
        .discard_if(|agent: &AgentRef| agent.is_in_conversation())
        .peek("plan_place", |agent: AgentRef| async move {
            agent.plan_place().await
        })
        .peek("reflect", move |agent: AgentRef| {
            let events = events.clone();
            async move {
                if agent.importance().take_if_reached(threshold) {
                    agent.reflect().await?;
                    info!(agent = %agent.name(), "agent reflected");
                    events.publish(SimEvent::AgentReflected {
                        agent: agent.name().to_string(),
                    });
                }
                Ok::<(), SimError>(())
            }
        });

    let failed = parking_lot::Mutex::new(Vec::new());
    let slot = ctx.clock.slot_in_hour();
    pipeline
        .run(group.clone(), &|failure: Failure<'_, AgentRef>| {
            let agent = failure.item;
            warn!(
                agent = %agent.name(),
                stage = failure.stage,
                error = %failure.error,
                "agent failed, falling back to hourly plan"
            );
            let fallback = agent
                .plan()
                .and_then(|plan| plan.action_for_slot(slot).map(str::to_string));
            if let Some(action) = fallback {
                agent.set_current_action(action);
            }
            ctx.events.publish(SimEvent::AgentFailed {
                agent: agent.name().to_string(),
                moment: Moment::Reactive.as_str().into(),
                error: failure.error.to_string(),
                retry: false,
            });
            failed.lock().push(agent.name().to_string());
        })
        .await;

    let now = ctx.clock.now();
    for agent in &group {
        ctx.actions
            .record(agent.name(), now, &agent.current_action())
            .await?;
    }

    Ok(MomentReport {
        agents: group.len(),
        failed: failed.into_inner(),
        recovered: Vec::new(),
    })
}
