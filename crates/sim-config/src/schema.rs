use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Root configuration, as read from `simulacra.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub clock: ClockConfig,
    pub scheduler: SchedulerConfig,
    pub conversation: ConversationConfig,
    pub memory: MemoryConfig,
    pub services: ServicesConfig,
    pub logging: LoggingConfig,
    pub world: WorldConfig,
    pub population: Vec<AgentSeed>,
}

// ── Clock ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Simulated instant the run starts at. Its time of day is also the
    /// daily reflection instant.
    pub start: NaiveDateTime,
    /// Simulated minutes advanced by each reactive tick. Must divide 60.
    pub granularity_minutes: u32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2023, 1, 13)
                .and_then(|d| d.and_hms_opt(7, 0, 0))
                .unwrap_or_default(),
            granularity_minutes: 10,
        }
    }
}

// ── Scheduler ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Real milliseconds between ticks (fixed rate).
    pub tick_period_ms: u64,
    /// Accumulated observation importance that triggers a reflection.
    pub reflection_threshold: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 10_000,
            reflection_threshold: 200,
        }
    }
}

// ── Conversation ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Consecutive failed turns after which a conversation is evicted.
    /// 0 = never evict.
    pub max_turn_failures: u32,
    /// Pause after a loop iteration in which every turn failed. 0 = none.
    pub failure_backoff_ms: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turn_failures: 5,
            failure_backoff_ms: 1_000,
        }
    }
}

// ── Memory ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Path to the SQLite database. None = keep memories in process.
    pub db_path: Option<PathBuf>,
    /// Memories retrieved per observation when planning a moment.
    pub relevant_limit: usize,
    /// Recent memories a reflection draws its questions from.
    pub reflection_recent_limit: usize,
    /// Memories retrieved per reflection question.
    pub reflection_answer_limit: usize,
    /// Memories retrieved per summary aspect.
    pub summary_limit: usize,
    /// Memories about the other participant used as conversation context.
    pub conversation_context_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            relevant_limit: 3,
            reflection_recent_limit: 75,
            reflection_answer_limit: 5,
            summary_limit: 10,
            conversation_context_limit: 5,
        }
    }
}

// ── Services ───────────────────────────────────────────────────

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// OpenAI-compatible API root (OpenAI, vLLM, Ollama's /v1, ...).
    pub base_url: String,
    pub api_key: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,
    pub embedding_dims: usize,
    /// Per-request timeout. 0 = no timeout.
    pub request_timeout_secs: u64,
    pub temperature: f32,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: None,
            chat_model: "gpt-4o-mini".into(),
            embedding_model: "text-embedding-3-small".into(),
            embedding_dims: 1536,
            request_timeout_secs: 60,
            temperature: 0.7,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── World & population ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// The places agents can be at, with the items in each.
    pub locations: Vec<LocationConfig>,
}

impl WorldConfig {
    pub fn location_names(&self) -> Vec<String> {
        self.locations.iter().map(|l| l.name.clone()).collect()
    }

    pub fn has_location(&self, name: &str) -> bool {
        self.locations.iter().any(|l| l.name == name)
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            locations: vec![
                LocationConfig::new("Smith house", &["bed", "stove", "shower"]),
                LocationConfig::new("Hobbs Cafe", &["coffee machine", "counter"]),
                LocationConfig::new("Oak Hill College", &["library desk", "whiteboard"]),
                LocationConfig::new("Town square", &["bench"]),
            ],
        }
    }
}

/// A place, written either as a bare name or as a table with items:
///
/// ```toml
/// [[world.locations]]
/// name = "Hobbs Cafe"
///
/// [[world.locations.items]]
/// name = "coffee machine"
/// status = "idle"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LocationEntry")]
pub struct LocationConfig {
    pub name: String,
    pub items: Vec<ItemConfig>,
}

impl LocationConfig {
    /// A location whose items all start out with the default status.
    pub fn new(name: &str, items: &[&str]) -> Self {
        Self {
            name: name.into(),
            items: items
                .iter()
                .map(|item| ItemConfig {
                    name: (*item).into(),
                    status: default_item_status(),
                })
                .collect(),
        }
    }
}

impl From<&str> for LocationConfig {
    fn from(name: &str) -> Self {
        Self::new(name, &[])
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LocationEntry {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        items: Vec<ItemConfig>,
    },
}

impl From<LocationEntry> for LocationConfig {
    fn from(entry: LocationEntry) -> Self {
        match entry {
            LocationEntry::Name(name) => Self {
                name,
                items: Vec::new(),
            },
            LocationEntry::Full { name, items } => Self { name, items },
        }
    }
}

/// Something in a location whose status agents read and change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemConfig {
    pub name: String,
    #[serde(default = "default_item_status")]
    pub status: String,
}

pub fn default_item_status() -> String {
    "idle".into()
}

/// One agent to create at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSeed {
    pub name: String,
    pub age: u32,
    #[serde(default)]
    pub traits: Vec<String>,
    /// Starting location; must be one of `world.locations`.
    pub home: String,
    #[serde(default = "default_circadian_rhythm")]
    pub circadian_rhythm: String,
    /// Statements stored as the agent's first memories.
    #[serde(default)]
    pub memories: Vec<String>,
}

fn default_circadian_rhythm() -> String {
    "wakes up at 7am, goes to bed at 11pm".into()
}

// ── Validation ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "{}: {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl SimConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Clock ───
        let granularity = self.clock.granularity_minutes;
        if granularity == 0 {
            warnings.push(ConfigWarning {
                field: "clock.granularity_minutes".into(),
                message: "granularity is 0; simulated time would never advance".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 10".into()),
            });
        } else if 60 % granularity != 0 {
            warnings.push(ConfigWarning {
                field: "clock.granularity_minutes".into(),
                message: format!("granularity {granularity} does not divide an hour"),
                severity: WarningSeverity::Error,
                hint: Some("Use 1, 2, 5, 10, 15, 20, 30 or 60".into()),
            });
        } else {
            let start = self.clock.start;
            if start.second() != 0 || start.nanosecond() != 0 || start.minute() % granularity != 0 {
                warnings.push(ConfigWarning {
                    field: "clock.start".into(),
                    message: format!(
                        "start {} is off the {granularity}-minute grid; no tick would land on a full hour",
                        start.format("%H:%M:%S")
                    ),
                    severity: WarningSeverity::Error,
                    hint: Some(format!(
                        "Start on a multiple of {granularity} minutes, e.g. {}",
                        start.format("%Y-%m-%dT%H:00:00")
                    )),
                });
            }
        }

        // ── Scheduler ───
        if self.scheduler.tick_period_ms == 0 {
            warnings.push(ConfigWarning {
                field: "scheduler.tick_period_ms".into(),
                message: "tick period is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 10000".into()),
            });
        } else if self.scheduler.tick_period_ms < 1_000 {
            warnings.push(ConfigWarning {
                field: "scheduler.tick_period_ms".into(),
                message: format!(
                    "tick period is {}ms; ticks will pile up behind LLM latency",
                    self.scheduler.tick_period_ms
                ),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }

        // ── Services ───
        if self.services.temperature < 0.0 || self.services.temperature > 2.0 {
            warnings.push(ConfigWarning {
                field: "services.temperature".into(),
                message: format!("temperature {} is out of range", self.services.temperature),
                severity: WarningSeverity::Error,
                hint: Some("Temperature must be between 0.0 and 2.0".into()),
            });
        }
        if self.services.api_key.is_none() && self.services.base_url == DEFAULT_BASE_URL {
            warnings.push(ConfigWarning {
                field: "services.api_key".into(),
                message: "no API key set for the default OpenAI endpoint".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set services.api_key or export OPENAI_API_KEY".into()),
            });
        }

        // ── Population ───
        if self.population.is_empty() {
            warnings.push(ConfigWarning {
                field: "population".into(),
                message: "no agents configured; ticks will do nothing".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Add [[population]] entries".into()),
            });
        }
        let mut seen = HashSet::new();
        for seed in &self.population {
            if !seen.insert(seed.name.as_str()) {
                warnings.push(ConfigWarning {
                    field: "population.name".into(),
                    message: format!("duplicate agent name '{}'", seed.name),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
            if !self.world.has_location(&seed.home) {
                warnings.push(ConfigWarning {
                    field: "population.home".into(),
                    message: format!("{}'s home '{}' is not a known location", seed.name, seed.home),
                    severity: WarningSeverity::Error,
                    hint: Some(format!(
                        "Known locations: {}",
                        self.world.location_names().join(", ")
                    )),
                });
            }
        }

        // ── World ───
        let mut places = HashSet::new();
        for location in &self.world.locations {
            if !places.insert(location.name.as_str()) {
                warnings.push(ConfigWarning {
                    field: "world.locations.name".into(),
                    message: format!("duplicate location '{}'", location.name),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
            let mut items = HashSet::new();
            for item in &location.items {
                if !items.insert(item.name.trim().to_lowercase()) {
                    warnings.push(ConfigWarning {
                        field: "world.locations.items.name".into(),
                        message: format!("duplicate item '{}' in {}", item.name, location.name),
                        severity: WarningSeverity::Error,
                        hint: Some("Item names are matched case-insensitively".into()),
                    });
                }
            }
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| w.to_string())
            .collect();

        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(errors.join("\n"))
        }
    }
}
