//! Configuration for the township simulation.
//!
//! Maps directly to `town.toml`. Every field has a default, so an empty file
//! (or no file) yields a runnable configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TownError};

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TownConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// World clock settings.
    #[serde(default)]
    pub clock: ClockConfig,
    /// Retrieval algorithm settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Recency and importance decay.
    #[serde(default)]
    pub decay: DecayConfig,
    /// Hot/archive storage limits.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Affinity clamp range and interaction step.
    #[serde(default)]
    pub affinity: AffinityConfig,
    /// Per-agent runtime tuning.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Reflection trigger.
    #[serde(default)]
    pub reflection: ReflectionConfig,
    /// Persistence / save settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl TownConfig {
    /// Load configuration from a TOML string and validate it.
    ///
    /// # Errors
    /// Returns `TownError::Config` if the TOML is invalid or fails validation.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str).map_err(|e| TownError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check cross-field invariants.
    ///
    /// # Errors
    /// Returns `TownError::Config` naming the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        self.retrieval.weights.validate()?;
        if self.decay.half_life_hours <= 0.0 || !self.decay.half_life_hours.is_finite() {
            return Err(TownError::Config(format!(
                "decay.half_life_hours must be positive, got {}",
                self.decay.half_life_hours
            )));
        }
        if self.decay.importance_rate_per_hour < 0.0 {
            return Err(TownError::Config(
                "decay.importance_rate_per_hour must not be negative".to_string(),
            ));
        }
        self.affinity.validate()?;
        if self.clock.step_secs == 0 {
            return Err(TownError::Config("clock.step_secs must be > 0".to_string()));
        }
        if self.runtime.perception_radius < 0.0
            || self.runtime.movement_speed < 0.0
            || self.runtime.interaction_radius < 0.0
        {
            return Err(TownError::Config(
                "runtime radius and speed must not be negative".to_string(),
            ));
        }
        if self.memory.hot_capacity == 0 {
            return Err(TownError::Config("memory.hot_capacity must be > 0".to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// World clock settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Simulated seconds per tick.
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,
    /// Simulated time at world start, in seconds.
    #[serde(default = "default_start_secs")]
    pub start_secs: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            step_secs: 600,
            start_secs: 8 * 3_600,
        }
    }
}

/// Which relevance strategy scores memory content against a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceKind {
    /// Token-set Jaccard overlap.
    #[default]
    Lexical,
    /// Hashed bag-of-words embedding with cosine similarity.
    Embedding,
}

/// Memory retrieval algorithm settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of memories retrieved per perception.
    #[serde(default = "default_5_usize")]
    pub top_k: usize,
    /// Relevance strategy.
    #[serde(default)]
    pub relevance: RelevanceKind,
    /// Dimensions of the hashed embedding (ignored by `lexical`).
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
    /// Retrieval weight tuning.
    #[serde(default)]
    pub weights: RetrievalWeights,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            relevance: RelevanceKind::Lexical,
            embedding_dimensions: 256,
            weights: RetrievalWeights::default(),
        }
    }
}

/// Retrieval scoring weights, must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrievalWeights {
    /// Weight for the recency factor.
    #[serde(default = "default_0_3")]
    pub recency: f64,
    /// Weight for normalized importance.
    #[serde(default = "default_0_3")]
    pub importance: f64,
    /// Weight for content relevance.
    #[serde(default = "default_0_4")]
    pub relevance: f64,
}

impl RetrievalWeights {
    /// Tolerance used when checking that weights sum to one.
    pub const SUM_TOLERANCE: f64 = 1e-6;

    /// Weights that only consider importance.
    #[must_use]
    pub fn importance_only() -> Self {
        Self {
            recency: 0.0,
            importance: 1.0,
            relevance: 0.0,
        }
    }

    /// Check that every weight is non-negative and they sum to 1.0.
    ///
    /// # Errors
    /// Returns `TownError::Config` otherwise.
    pub fn validate(&self) -> Result<()> {
        let parts = [self.recency, self.importance, self.relevance];
        if parts.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Err(TownError::Config(format!(
                "retrieval weights must be finite and non-negative: {self:?}"
            )));
        }
        let sum: f64 = parts.iter().sum();
        if (sum - 1.0).abs() > Self::SUM_TOLERANCE {
            return Err(TownError::Config(format!(
                "retrieval weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

impl Default for RetrievalWeights {
    fn default() -> Self {
        Self {
            recency: 0.3,
            importance: 0.3,
            relevance: 0.4,
        }
    }
}

/// Recency half-life and importance decay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    /// Simulated hours after which recency weight halves.
    #[serde(default = "default_24_f64")]
    pub half_life_hours: f64,
    /// Entries untouched for longer than this start losing importance.
    #[serde(default = "default_48_f64")]
    pub idle_threshold_hours: f64,
    /// Exponential importance decay rate per idle hour past the threshold.
    #[serde(default = "default_importance_rate")]
    pub importance_rate_per_hour: f64,
    /// Run the decay pass every N ticks (0 disables it).
    #[serde(default = "default_every_ticks")]
    pub every_ticks: u64,
}

impl DecayConfig {
    /// Recency decay constant λ = ln 2 / half-life.
    #[must_use]
    pub fn lambda(&self) -> f64 {
        std::f64::consts::LN_2 / self.half_life_hours
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            half_life_hours: 24.0,
            idle_threshold_hours: 48.0,
            importance_rate_per_hour: 0.01,
            every_ticks: 36,
        }
    }
}

/// Hot/archive storage limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Max entries scored by retrieval per agent before the oldest are archived.
    #[serde(default = "default_hot_capacity")]
    pub hot_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { hot_capacity: 2_000 }
    }
}

/// Affinity clamp range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffinityConfig {
    /// Lower bound of any affinity score.
    #[serde(default = "default_neg_1_0")]
    pub min: f64,
    /// Upper bound of any affinity score.
    #[serde(default = "default_1_0")]
    pub max: f64,
    /// Delta applied to the initiator's affinity on a friendly interaction.
    #[serde(default = "default_0_05")]
    pub interaction_delta: f64,
}

impl AffinityConfig {
    /// Check the clamp range and the interaction delta.
    ///
    /// # Errors
    /// [`TownError::Config`] for a non-finite bound or delta, or an empty range.
    pub fn validate(&self) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min >= self.max {
            return Err(TownError::Config(format!(
                "affinity range must be finite and non-empty: [{}, {}]",
                self.min, self.max
            )));
        }
        if !self.interaction_delta.is_finite() {
            return Err(TownError::Config(format!(
                "affinity.interaction_delta must be finite, got {}",
                self.interaction_delta
            )));
        }
        Ok(())
    }
}

impl Default for AffinityConfig {
    fn default() -> Self {
        Self {
            min: -1.0,
            max: 1.0,
            interaction_delta: 0.05,
        }
    }
}

/// Which decision policy drives every runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Follow the schedule; greet the closest friend when co-located.
    #[default]
    ScheduleDriven,
    /// Chat with whoever is nearest.
    Sociable,
}

/// Per-agent runtime tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Radius within which nodes and agents are perceived.
    #[serde(default = "default_perception_radius")]
    pub perception_radius: f32,
    /// Max distance moved per tick.
    #[serde(default = "default_movement_speed")]
    pub movement_speed: f32,
    /// Agents this close to each other count as co-located and may interact.
    #[serde(default = "default_interaction_radius")]
    pub interaction_radius: f32,
    /// Wall-clock budget for one runtime's decide phase.
    #[serde(default = "default_decide_timeout_ms")]
    pub decide_timeout_ms: u64,
    /// Decision policy.
    #[serde(default)]
    pub policy: PolicyKind,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            perception_radius: 10.0,
            movement_speed: 5.0,
            interaction_radius: 2.0,
            decide_timeout_ms: 250,
            policy: PolicyKind::ScheduleDriven,
        }
    }
}

/// Reflection trigger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// Whether runtimes emit reflections at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Accumulated importance that triggers one reflection.
    #[serde(default = "default_reflection_threshold")]
    pub importance_threshold: f64,
    /// How many retrieved memories a reflection cites.
    #[serde(default = "default_3_usize")]
    pub max_citations: usize,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            importance_threshold: 150.0,
            max_citations: 3,
        }
    }
}

/// Persistence / save configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Flush memories and affinities on teardown.
    #[serde(default)]
    pub enabled: bool,
    /// SQLite database path.
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Use WAL mode for concurrent reads.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "township.db".to_string(),
            wal_mode: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_db_path() -> String { "township.db".to_string() }
fn default_step_secs() -> u64 { 600 }
fn default_start_secs() -> u64 { 8 * 3_600 }
fn default_every_ticks() -> u64 { 36 }
fn default_decide_timeout_ms() -> u64 { 250 }
fn default_0_05() -> f64 { 0.05 }
fn default_0_3() -> f64 { 0.3 }
fn default_0_4() -> f64 { 0.4 }
fn default_1_0() -> f64 { 1.0 }
fn default_neg_1_0() -> f64 { -1.0 }
fn default_24_f64() -> f64 { 24.0 }
fn default_48_f64() -> f64 { 48.0 }
fn default_importance_rate() -> f64 { 0.01 }
fn default_reflection_threshold() -> f64 { 150.0 }
fn default_perception_radius() -> f32 { 10.0 }
fn default_movement_speed() -> f32 { 5.0 }
fn default_interaction_radius() -> f32 { 2.0 }
fn default_3_usize() -> usize { 3 }
fn default_5_usize() -> usize { 5 }
fn default_embedding_dimensions() -> usize { 256 }
fn default_hot_capacity() -> usize { 2_000 }
