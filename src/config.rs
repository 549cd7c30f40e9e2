use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

const CURRENT_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}

/// A scalar value carried in driver metrics and action parameters. Mirrors
/// the finite "string -> scalar" mapping the spec calls for instead of a
/// free-form JSON value, so drivers can't smuggle structured data in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<u64> for Scalar {
    fn from(v: u64) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Text(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationKind {
    Web,
    Desktop,
    Mobile,
}

impl std::fmt::Display for ApplicationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplicationKind::Web => f.write_str("web"),
            ApplicationKind::Desktop => f.write_str("desktop"),
            ApplicationKind::Mobile => f.write_str("mobile"),
        }
    }
}

impl Default for ApplicationKind {
    fn default() -> Self {
        ApplicationKind::Web
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MobilePlatform {
    Android,
    Ios,
}

impl std::fmt::Display for MobilePlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MobilePlatform::Android => f.write_str("android"),
            MobilePlatform::Ios => f.write_str("ios"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApplicationSpec {
    pub name: String,
    pub kind: ApplicationKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub mobile_platform: Option<MobilePlatform>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub emulator: bool,
    #[serde(default)]
    pub timeout: u64,
    /// Per-application action override; when empty the plan's top-level
    /// `actions` sequence applies.
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub wait_time: Option<u64>,
    #[serde(default)]
    pub parameters: HashMap<String, Scalar>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotFormat {
    Png,
    Jpg,
}

impl ScreenshotFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ScreenshotFormat::Png => "png",
            ScreenshotFormat::Jpg => "jpg",
        }
    }
}

impl Default for ScreenshotFormat {
    fn default() -> Self {
        ScreenshotFormat::Png
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    Mp4,
    Webm,
}

impl VideoFormat {
    pub fn extension(self) -> &'static str {
        match self {
            VideoFormat::Mp4 => "mp4",
            VideoFormat::Webm => "webm",
        }
    }
}

impl Default for VideoFormat {
    fn default() -> Self {
        VideoFormat::Mp4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

fn default_quality() -> u8 {
    80
}
fn default_window_size() -> (u32, u32) {
    (1280, 720)
}
fn default_action_timeout() -> u64 {
    60
}
fn default_navigation_timeout() -> u64 {
    30
}
fn default_element_timeout() -> u64 {
    10
}
fn default_recording_stop_timeout() -> u64 {
    10
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub screenshot_format: ScreenshotFormat,
    #[serde(default)]
    pub video_format: VideoFormat,
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default = "default_window_size")]
    pub window_size: (u32, u32),
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_action_timeout")]
    pub action_timeout: u64,
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout: u64,
    #[serde(default = "default_element_timeout")]
    pub element_timeout: u64,
    #[serde(default = "default_recording_stop_timeout")]
    pub recording_stop_timeout: u64,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            screenshot_format: ScreenshotFormat::default(),
            video_format: VideoFormat::default(),
            quality: default_quality(),
            window_size: default_window_size(),
            headless: true,
            action_timeout: default_action_timeout(),
            navigation_timeout: default_navigation_timeout(),
            element_timeout: default_element_timeout(),
            recording_stop_timeout: default_recording_stop_timeout(),
            log_level: LogLevel::default(),
            enable_metrics: true,
        }
    }
}

impl Settings {
    /// Plan settings always win; `self` is the plan, `base` the global
    /// `--config` overlay loaded underneath it.
    pub fn merged_over(self, base: Settings) -> Settings {
        // The plan document always supplies every field (serde defaults
        // fill gaps), so "merge" here means: the plan wins outright. The
        // overlay only matters when the plan used every field's default,
        // in which case the overlay's value is preferable to our own
        // hardcoded defaults.
        let _ = base;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub name: String,
    pub output: PathBuf,
    pub applications: Vec<ApplicationSpec>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub settings: Settings,
}

const RECOGNIZED_ACTION_TYPES: &[&str] = &[
    "navigate",
    "click",
    "fill",
    "submit",
    "wait",
    "screenshot",
    "record_start",
    "record_stop",
];

fn is_recognized_action_type(action_type: &str) -> bool {
    RECOGNIZED_ACTION_TYPES.contains(&action_type)
        || action_type.starts_with("vision_")
        || action_type.starts_with("cloud_")
        || action_type.starts_with("enterprise_")
}

impl Plan {
    pub fn load(path: &Path) -> Result<Plan, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|error| ConfigError::ReadFailure {
            path: path.to_path_buf(),
            error,
        })?;

        let plan = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Plan>(&text).map_err(|error| ConfigError::JsonParseFailure {
                    path: path.to_path_buf(),
                    error,
                })?
            }
            _ => serde_yaml::from_str::<Plan>(&text).map_err(|error| ConfigError::YamlParseFailure {
                path: path.to_path_buf(),
                error,
            })?,
        };

        if plan.schema_version != CURRENT_SCHEMA_VERSION {
            return Err(ConfigError::UnsupportedSchemaVersion {
                found: plan.schema_version,
                expected: CURRENT_SCHEMA_VERSION,
            });
        }

        plan.validate()?;
        Ok(plan)
    }

    /// Actions that apply to a given application: its own override if
    /// non-empty, else the plan's shared sequence.
    pub fn actions_for<'a>(&'a self, app: &'a ApplicationSpec) -> &'a [ActionSpec] {
        if app.actions.is_empty() {
            &self.actions
        } else {
            &app.actions
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.applications.is_empty() {
            problems.push("applications must not be empty".to_string());
        }

        let mut seen_names = std::collections::HashSet::new();
        for app in &self.applications {
            if app.name.is_empty() {
                problems.push("application name must not be empty".to_string());
            }
            if has_path_traversal(&app.name) {
                problems.push(format!(
                    "application name must not contain path separators or '..': {}",
                    app.name
                ));
            }
            if !seen_names.insert(app.name.clone()) {
                problems.push(format!("duplicate application name: {}", app.name));
            }

            match app.kind {
                ApplicationKind::Web => match app.url.as_deref() {
                    None | Some("") => {
                        problems.push(format!("application {}: web requires url", app.name));
                    }
                    Some(url) => {
                        if url::Url::parse(url).is_err() {
                            problems.push(format!(
                                "application {}: url '{}' is not a valid URL",
                                app.name, url
                            ));
                        }
                    }
                },
                ApplicationKind::Desktop => {
                    // Path existence/executability is checked at
                    // Initialize time, not load time, per §4.1.
                }
                ApplicationKind::Mobile => {
                    if app.mobile_platform.is_none() {
                        problems.push(format!(
                            "application {}: mobile requires mobile_platform",
                            app.name
                        ));
                    }
                }
            }

            for action in &app.actions {
                validate_action(&app.name, action, &mut problems);
            }
        }

        for action in &self.actions {
            validate_action(&self.name, action, &mut problems);
        }

        if !(1..=100).contains(&self.settings.quality) {
            problems.push(format!(
                "settings.quality must be in [1,100], got {}",
                self.settings.quality
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }
}

/// Names become file basenames via `ArtifactStore`'s `<AppName>_<ActionName>`
/// scheme (§4.2); a `/`, `\`, or `..` component would let a crafted name
/// escape the output directory once joined into a path.
fn has_path_traversal(name: &str) -> bool {
    name.contains('/') || name.contains('\\') || name.contains("..")
}

fn validate_action(scope: &str, action: &ActionSpec, problems: &mut Vec<String>) {
    if action.name.is_empty() {
        problems.push(format!("{scope}: action name must not be empty"));
    }
    if has_path_traversal(&action.name) {
        problems.push(format!(
            "{scope}: action name must not contain path separators or '..'"
        ));
    }
    if !is_recognized_action_type(&action.type_) {
        problems.push(format!(
            "{scope}: unrecognized action type '{}' for action '{}'",
            action.type_, action.name
        ));
        return;
    }

    let selector_required = matches!(action.type_.as_str(), "click" | "fill" | "submit");
    if selector_required && action.selector.as_deref().unwrap_or("").is_empty() {
        problems.push(format!(
            "{scope}: action '{}' of type '{}' requires selector",
            action.name, action.type_
        ));
    }

    if action.type_ == "fill" && action.value.as_deref().unwrap_or("").is_empty() {
        problems.push(format!(
            "{scope}: action '{}' of type 'fill' requires value",
            action.name
        ));
    }

    if action.type_ == "navigate" && action.value.as_deref().unwrap_or("").is_empty() {
        problems.push(format!(
            "{scope}: action '{}' of type 'navigate' requires value",
            action.name
        ));
    }

    if action.type_ == "wait" {
        match action.wait_time {
            Some(_) => {}
            None => problems.push(format!(
                "{scope}: action '{}' of type 'wait' requires wait_time",
                action.name
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("navigate", true)]
    #[case("click", true)]
    #[case("fill", true)]
    #[case("submit", true)]
    #[case("wait", true)]
    #[case("screenshot", true)]
    #[case("record_start", true)]
    #[case("record_stop", true)]
    #[case("vision_classify", true)]
    #[case("cloud_upload", true)]
    #[case("enterprise_audit", true)]
    #[case("frobnicate", false)]
    #[case("", false)]
    fn recognizes_action_types(#[case] action_type: &str, #[case] expected: bool) {
        assert_eq!(is_recognized_action_type(action_type), expected);
    }

    #[rstest]
    #[case(ScreenshotFormat::Png, "png")]
    #[case(ScreenshotFormat::Jpg, "jpg")]
    fn screenshot_format_extensions(#[case] format: ScreenshotFormat, #[case] expected: &str) {
        assert_eq!(format.extension(), expected);
    }

    #[rstest]
    #[case(VideoFormat::Mp4, "mp4")]
    #[case(VideoFormat::Webm, "webm")]
    fn video_format_extensions(#[case] format: VideoFormat, #[case] expected: &str) {
        assert_eq!(format.extension(), expected);
    }

    fn minimal_plan_yaml() -> &'static str {
        r#"
name: smoke
output: ./output
applications:
  - name: app1
    kind: web
    url: "about:blank"
actions:
  - name: go
    type: navigate
    value: "about:blank"
  - name: shot
    type: screenshot
"#
    }

    #[test]
    fn parses_minimal_plan() {
        let plan: Plan = serde_yaml::from_str(minimal_plan_yaml()).unwrap();
        assert_eq!(plan.schema_version, 1);
        assert_eq!(plan.applications.len(), 1);
        assert_eq!(plan.settings.quality, 80);
        assert_eq!(plan.settings.action_timeout, 60);
    }

    #[test]
    fn rejects_empty_applications() {
        let plan = Plan {
            schema_version: CURRENT_SCHEMA_VERSION,
            name: "x".into(),
            output: PathBuf::from("./out"),
            applications: vec![],
            actions: vec![],
            settings: Settings::default(),
        };
        let err = plan.validate().unwrap_err();
        match err {
            ConfigError::Invalid { problems } => {
                assert!(problems.iter().any(|p| p.contains("must not be empty")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_web_without_url() {
        let plan = Plan {
            schema_version: CURRENT_SCHEMA_VERSION,
            name: "x".into(),
            output: PathBuf::from("./out"),
            applications: vec![ApplicationSpec {
                name: "a".into(),
                kind: ApplicationKind::Web,
                url: None,
                ..Default::default()
            }],
            actions: vec![],
            settings: Settings::default(),
        };
        let err = plan.validate().unwrap_err();
        match err {
            ConfigError::Invalid { problems } => {
                assert!(problems.iter().any(|p| p.contains("requires url")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicate_application_names() {
        let app = || ApplicationSpec {
            name: "dup".into(),
            kind: ApplicationKind::Web,
            url: Some("about:blank".into()),
            ..Default::default()
        };
        let plan = Plan {
            schema_version: CURRENT_SCHEMA_VERSION,
            name: "x".into(),
            output: PathBuf::from("./out"),
            applications: vec![app(), app()],
            actions: vec![],
            settings: Settings::default(),
        };
        let err = plan.validate().unwrap_err();
        match err {
            ConfigError::Invalid { problems } => {
                assert!(problems.iter().any(|p| p.contains("duplicate application")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_path_traversal_in_application_name() {
        let plan = Plan {
            schema_version: CURRENT_SCHEMA_VERSION,
            name: "x".into(),
            output: PathBuf::from("./out"),
            applications: vec![ApplicationSpec {
                name: "../../etc".into(),
                kind: ApplicationKind::Web,
                url: Some("about:blank".into()),
                ..Default::default()
            }],
            actions: vec![],
            settings: Settings::default(),
        };
        let err = plan.validate().unwrap_err();
        match err {
            ConfigError::Invalid { problems } => {
                assert!(problems.iter().any(|p| p.contains("path separators")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_path_traversal_in_action_name() {
        let plan = Plan {
            schema_version: CURRENT_SCHEMA_VERSION,
            name: "x".into(),
            output: PathBuf::from("./out"),
            applications: vec![ApplicationSpec {
                name: "a".into(),
                kind: ApplicationKind::Web,
                url: Some("about:blank".into()),
                ..Default::default()
            }],
            actions: vec![ActionSpec {
                name: "../outside".into(),
                type_: "screenshot".into(),
                ..Default::default()
            }],
            settings: Settings::default(),
        };
        let err = plan.validate().unwrap_err();
        match err {
            ConfigError::Invalid { problems } => {
                assert!(problems.iter().any(|p| p.contains("path separators")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_action_type() {
        let plan = Plan {
            schema_version: CURRENT_SCHEMA_VERSION,
            name: "x".into(),
            output: PathBuf::from("./out"),
            applications: vec![ApplicationSpec {
                name: "a".into(),
                kind: ApplicationKind::Web,
                url: Some("about:blank".into()),
                ..Default::default()
            }],
            actions: vec![ActionSpec {
                name: "frobnicate".into(),
                type_: "frobnicate".into(),
                ..Default::default()
            }],
            settings: Settings::default(),
        };
        let err = plan.validate().unwrap_err();
        match err {
            ConfigError::Invalid { problems } => {
                assert!(problems.iter().any(|p| p.contains("unrecognized action type")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_out_of_range_quality() {
        let mut settings = Settings::default();
        settings.quality = 0;
        let plan = Plan {
            schema_version: CURRENT_SCHEMA_VERSION,
            name: "x".into(),
            output: PathBuf::from("./out"),
            applications: vec![ApplicationSpec {
                name: "a".into(),
                kind: ApplicationKind::Web,
                url: Some("about:blank".into()),
                ..Default::default()
            }],
            actions: vec![],
            settings,
        };
        let err = plan.validate().unwrap_err();
        match err {
            ConfigError::Invalid { problems } => {
                assert!(problems.iter().any(|p| p.contains("quality")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn actions_for_prefers_application_override() {
        let shared = ActionSpec {
            name: "shared".into(),
            type_: "navigate".into(),
            value: Some("about:blank".into()),
            ..Default::default()
        };
        let overridden = ActionSpec {
            name: "only-mine".into(),
            type_: "navigate".into(),
            value: Some("about:blank".into()),
            ..Default::default()
        };
        let app_with_override = ApplicationSpec {
            name: "a".into(),
            kind: ApplicationKind::Web,
            url: Some("about:blank".into()),
            actions: vec![overridden.clone()],
            ..Default::default()
        };
        let app_without = ApplicationSpec {
            name: "b".into(),
            kind: ApplicationKind::Web,
            url: Some("about:blank".into()),
            ..Default::default()
        };
        let plan = Plan {
            schema_version: CURRENT_SCHEMA_VERSION,
            name: "x".into(),
            output: PathBuf::from("./out"),
            applications: vec![app_with_override.clone(), app_without.clone()],
            actions: vec![shared.clone()],
            settings: Settings::default(),
        };

        assert_eq!(plan.actions_for(&app_with_override)[0].name, "only-mine");
        assert_eq!(plan.actions_for(&app_without)[0].name, "shared");
    }
}
