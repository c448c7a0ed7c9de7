//! Prompt templates and the JSON shapes the model is asked to answer in.

use serde::Deserialize;
use sim_engine::Item;

// ── Answers ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct ObservationAnswer {
    pub observation: String,
    pub importance: u8,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MomentAnswer {
    pub action: String,
    #[serde(default)]
    pub replan_reason: Option<String>,
    #[serde(default)]
    pub talk_to: Option<String>,
    #[serde(default)]
    pub items: Vec<ItemUpdate>,
}

/// A status the acting agent leaves an item in.
#[derive(Debug, Deserialize)]
pub(crate) struct ItemUpdate {
    pub item: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlaceAnswer {
    pub place: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QuestionsAnswer {
    pub questions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HourlyAnswer {
    pub slots: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TurnAnswer {
    pub response: String,
    #[serde(default)]
    pub should_end: bool,
}

// ── Templates ──────────────────────────────────────────────────

pub(crate) fn observation(summary: &str, context: &str) -> String {
    format!(
        r#"Agent summary:
{summary}

Condense the following into one short, factual observation the agent might act upon:
{context}

Rate how important it is for the agent to remember this, from 1 (mundane, e.g. brushing teeth)
to 10 (poignant, e.g. a break up or a college acceptance). Be conservative.
The observation is about the surroundings and other people, not the agent itself.

Answer as JSON: {{"observation": "...", "importance": 3}}"#
    )
}

pub(crate) struct MomentPrompt<'a> {
    pub summary: &'a str,
    pub name: &'a str,
    pub granularity_minutes: u32,
    pub previous_action: &'a str,
    pub observation: &'a str,
    pub memories: &'a [String],
    pub hour_plan: &'a [String],
    pub slot_plan: &'a str,
    pub people: &'a [String],
    pub items: &'a [Item],
    pub now: &'a str,
}

pub(crate) fn moment(p: &MomentPrompt<'_>) -> String {
    let people = if p.people.is_empty() {
        "nobody".to_string()
    } else {
        p.people.join(", ")
    };
    let items = if p.items.is_empty() {
        "none".to_string()
    } else {
        p.items
            .iter()
            .map(|i| format!("{} ({})", i.name, i.status))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        r#"{summary}
It is {now}. Decide what {name} does for the next {minutes} minutes.
Previous action: {previous}.
Latest observation: {observation}.
Relevant memories: {memories}.
Plan for the hour: {hour}.
Plan for right now: {slot}.
People nearby: {people}.
Items here and their statuses: {items}.
Base the action on the plan, adjusted for the observation and the memories. Keep it feasible,
descriptive, and avoid repeating the previous action unless it makes sense.
Only give a replan reason if the action strays far enough from the plan to warrant a new one.
Only name someone to talk to if there is a reason to, and only someone nearby.
List any item here whose status the action changes. Reset an item to idle when done with it.

Answer as JSON: {{"action": "...", "replan_reason": null, "talk_to": null, "items": [{{"item": "...", "status": "..."}}]}}"#,
        summary = p.summary,
        now = p.now,
        name = p.name,
        minutes = p.granularity_minutes,
        previous = p.previous_action,
        observation = p.observation,
        memories = p.memories.join("; "),
        hour = p.hour_plan.join("; "),
        slot = p.slot_plan,
    )
}

pub(crate) fn place(
    name: &str,
    location: &str,
    home: &str,
    locations: &[String],
    action: &str,
) -> String {
    format!(
        r#"{name} is at {location}. {name}'s home is {home}.
{name} knows these places: {places}.
{name} is about to: {action}.
Which place should {name} be at to do that? Prefer staying put if the action can be done here.

Answer as JSON: {{"place": "..."}}"#,
        places = locations.join(", "),
    )
}

pub(crate) fn reflection_questions(statements: &[String]) -> String {
    let numbered: Vec<String> = statements
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{i}) {s}"))
        .collect();
    format!(
        r#"{statements}

Given only the statements above, what are the 3 most salient high-level questions we can answer
about their subjects?

Answer as JSON: {{"questions": ["...", "...", "..."]}}"#,
        statements = numbered.join("\n"),
    )
}

pub(crate) fn insights(name: &str, statements: &[String]) -> String {
    format!(
        r#"Statements about {name}:
{statements}

What 5 high-level insights can you infer from the statements above?
Format each as `insight (because of <statement>, <statement>, ...)`."#,
        statements = statements.join("\n"),
    )
}

pub(crate) struct DayPrompt<'a> {
    pub summary: &'a str,
    pub circadian_rhythm: &'a str,
    pub name: &'a str,
    pub yesterday: &'a str,
    pub previous_plan: Option<&'a [String]>,
    pub current_action: &'a str,
    pub today: &'a str,
    /// Set when replanning mid-day.
    pub replan: Option<(&'a str, u32)>,
}

pub(crate) fn day(p: &DayPrompt<'_>) -> String {
    let previous = match p.previous_plan {
        Some(plan) if !plan.is_empty() => plan.join("; "),
        _ => "unknown, guess something reasonable".to_string(),
    };
    let mut prompt = format!(
        r#"Keep each entry 10 words or less, formatted like `8:00) Wake up and do morning routine`.
Keep in mind occupations and the day of the week.
{summary}.
Rough circadian rhythm: {rhythm}.
{name}'s plan for {yesterday}: {previous}.
Current action: {action}.
Do not include other people in the plan.
"#,
        summary = p.summary,
        rhythm = p.circadian_rhythm,
        name = p.name,
        yesterday = p.yesterday,
        action = p.current_action,
    );
    match p.replan {
        Some((reason, hour)) => prompt.push_str(&format!(
            "Reason for replanning: {reason}.\n\
             It is now {hour:02}:00 on {today}. Keep the entries for earlier hours exactly the same.\n",
            today = p.today,
        )),
        None => prompt.push_str(&format!("Today is {}.\n", p.today)),
    }
    prompt.push_str("Give a broad-strokes plan for every waking hour, one entry per line.");
    prompt
}

pub(crate) fn rest_of_hour(
    summary: &str,
    hour_entry: &str,
    now: &str,
    slots: &[String],
    reason: Option<&str>,
) -> String {
    let context = reason
        .map(|r| format!("Context for replanning: {r}.\n"))
        .unwrap_or_default();
    format!(
        r#"{summary}
{context}Broad plan for the hour: {hour_entry}
It is {now}. Expand the broad plan into a detailed plan for each of these times: {times}.
Keep each entry 30 words or less and consistent with the broad plan.

Answer as JSON with exactly {count} entries: {{"slots": ["...", "..."]}}"#,
        times = slots.join(", "),
        count = slots.len(),
    )
}

pub(crate) fn summary_query(name: &str, aspect: &str) -> String {
    format!("How would one describe {name}'s {aspect} given the following statements?")
}

pub(crate) fn summary_aspect(name: &str, aspect: &str, statements: &[String]) -> String {
    format!(
        "In under 30 words, abstractly describe {name}'s {aspect} given these statements: {}",
        statements.join("; ")
    )
}

pub(crate) fn conversation_context(name: &str, summary: &str, other: &str, memories: &[String]) -> String {
    format!(
        r#"Summary about {name}: {summary}
Summarize the following statements into context for a conversation with {other}:
{memories}"#,
        memories = memories.join("\n"),
    )
}

pub(crate) struct TurnPrompt<'a> {
    pub summary: &'a str,
    pub now: &'a str,
    pub opening: &'a str,
    pub other: &'a str,
    pub context: &'a str,
    pub speaker: &'a str,
    pub transcript: &'a str,
}

pub(crate) fn turn(p: &TurnPrompt<'_>) -> String {
    let (history, ask) = if p.transcript.is_empty() {
        (String::new(), format!("What would {} say to {}?", p.speaker, p.other))
    } else {
        (
            format!("Conversation so far:\n{}", p.transcript),
            format!("How would {} respond to {}?", p.speaker, p.other),
        )
    };
    format!(
        r#"{summary}
It is {now}.
Observation: {opening}
Relevant context from {speaker}'s memory about {other}: {context}
Use the context only where it fits. Talk casually, keep it short, and end the conversation as
soon as it is natural to.
{history}
{ask}

Answer as JSON: {{"response": "...", "should_end": false}}"#,
        summary = p.summary,
        now = p.now,
        opening = p.opening,
        speaker = p.speaker,
        other = p.other,
        context = p.context,
    )
}

pub(crate) const SUMMARY_ASPECTS: [&str; 3] = [
    "core characteristics",
    "current daily occupation",
    "feeling about their recent progress in life",
];
