use serde::{Deserialize, Serialize};

/// Isolation level requested when a session is opened.
///
/// Engines are free to reject levels they cannot honor; the runner reports
/// such a refusal as a start failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IsolationLevel::ReadUncommitted => write!(f, "READ UNCOMMITTED"),
            IsolationLevel::ReadCommitted => write!(f, "READ COMMITTED"),
            IsolationLevel::RepeatableRead => write!(f, "REPEATABLE READ"),
            IsolationLevel::Serializable => write!(f, "SERIALIZABLE"),
        }
    }
}

/// Per-invocation transaction options
///
/// Built with chained setters, or deserialized from service configuration:
///
/// ```
/// use txrunner::{IsolationLevel, TxOptions};
///
/// let options = TxOptions::new()
///     .label("transfer")
///     .isolation_level(IsolationLevel::Serializable);
/// assert_eq!(options.label.as_deref(), Some("transfer"));
///
/// let from_config: TxOptions = serde_json::from_str(r#"{"read_only": true}"#).unwrap();
/// assert!(from_config.read_only);
/// assert_eq!(from_config.isolation_level, IsolationLevel::ReadCommitted);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxOptions {
    /// Name attached to the tracing span of the run
    pub label: Option<String>,

    /// Isolation level passed to the engine on begin
    pub isolation_level: IsolationLevel,

    /// Whether the session must reject writes
    pub read_only: bool,
}

impl TxOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the span label
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the isolation level
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    /// Mark the transaction read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub(crate) fn span_label(&self) -> &str {
        self.label.as_deref().unwrap_or("unnamed")
    }
}
