use std::path::PathBuf;

use thiserror::Error;

/// Machine-readable error taxonomy, preserved verbatim in `report.json` so a
/// downstream consumer can group failures without parsing message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigInvalid,
    OutputUnwritable,
    DriverUnavailable,
    CapabilityUnavailable,
    ElementUnactionable,
    NavigationTimeout,
    ActionTimeout,
    UnknownAction,
    FeatureDisabled,
    Cancelled,
    ReportEmission,
}

impl ErrorKind {
    /// Ends the current application but not the run.
    pub fn is_fatal_for_app(self) -> bool {
        matches!(self, ErrorKind::DriverUnavailable)
    }

    /// Ends all subsequent applications, but the Reporter still runs.
    pub fn is_fatal_for_run(self) -> bool {
        matches!(self, ErrorKind::Cancelled)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("plan is invalid:\n{}", .problems.iter().map(|p| format!("  - {p}")).collect::<Vec<_>>().join("\n"))]
    Invalid { problems: Vec<String> },

    #[error("unrecognized plan schema_version {found}, expected {expected}")]
    UnsupportedSchemaVersion { found: u32, expected: u32 },

    #[error("can't read plan file\npath = {path}\nerror = {error}")]
    ReadFailure {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("can't parse plan file as YAML\npath = {path}\nerror = {error}")]
    YamlParseFailure {
        path: PathBuf,
        error: serde_yaml::Error,
    },

    #[error("can't parse plan file as JSON\npath = {path}\nerror = {error}")]
    JsonParseFailure {
        path: PathBuf,
        error: serde_json::Error,
    },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ConfigInvalid
    }
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("could not create output directory\npath = {path}\nerror = {error}")]
    DirectoryCreation {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("artifact path escapes output directory: {path}")]
    Escape { path: PathBuf },

    #[error("could not write artifact\npath = {path}\nerror = {error}")]
    WriteFailure {
        path: PathBuf,
        error: std::io::Error,
    },
}

impl ArtifactError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::OutputUnwritable
    }
}

/// Errors raised by a `Driver` implementation. One variant per §7 row that a
/// driver is the origin of.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("driver unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("capability unavailable on this host: {capability}")]
    CapabilityUnavailable { capability: String },

    #[error("element unactionable: selector = {selector}")]
    ElementUnactionable { selector: String },

    #[error("navigation timed out after {timeout_secs}s: {target}")]
    NavigationTimeout { target: String, timeout_secs: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("not recording")]
    NotRecording,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriverError::Unavailable { .. } => ErrorKind::DriverUnavailable,
            DriverError::CapabilityUnavailable { .. } => ErrorKind::CapabilityUnavailable,
            DriverError::ElementUnactionable { .. } => ErrorKind::ElementUnactionable,
            DriverError::NavigationTimeout { .. } => ErrorKind::NavigationTimeout,
            DriverError::Cancelled => ErrorKind::Cancelled,
            // "not recording" has no dedicated kind in §7; it surfaces as a
            // capability-class failure on the stop-recording action.
            DriverError::NotRecording => ErrorKind::CapabilityUnavailable,
            DriverError::Io(_) => ErrorKind::CapabilityUnavailable,
        }
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("unknown action type: {action_type}")]
    UnknownAction { action_type: String },

    #[error("action timed out after {timeout_secs}s")]
    ActionTimeout { timeout_secs: u64 },

    #[error("feature disabled: {feature}")]
    FeatureDisabled { feature: String },

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::UnknownAction { .. } => ErrorKind::UnknownAction,
            DispatchError::ActionTimeout { .. } => ErrorKind::ActionTimeout,
            DispatchError::FeatureDisabled { .. } => ErrorKind::FeatureDisabled,
            DispatchError::Driver(inner) => inner.kind(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("could not write report\npath = {path}\nerror = {error}")]
    WriteFailure {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("could not serialize report\nerror = {error}")]
    SerializationFailure { error: serde_json::Error },
}

impl ReportError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ReportEmission
    }
}

/// Prints an error and its full chain, the way the teacher's CLI reports a
/// top-level failure before exiting non-zero.
pub fn default_error_handler(error: anyhow::Error, writer: &mut dyn std::io::Write) {
    let _ = writeln!(writer, "Error: {error}");
    for cause in error.chain().skip(1) {
        let _ = writeln!(writer, "Caused by: {cause}");
    }
}
