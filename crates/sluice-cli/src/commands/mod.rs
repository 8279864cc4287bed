pub mod apply;
pub mod clear_marker;
pub mod create;
pub mod destroy;
pub mod inspect;
pub mod post_apply;
pub mod require;
pub mod status;
pub mod verify_store;

use indicatif::{ProgressBar, ProgressStyle};
use sluice_core::{
    CoreError, Stage, StageState, StagingRootValidator, TargetDirectoryValidator,
    ValidatorPipeline,
};
use sluice_engine::{check_rsync_prereqs, format_missing, select_engine};
use sluice_schema::{
    parse_config_file, stage_type, OwnerId, SluiceConfig, StageId, ValidationResult,
};
use sluice_store::{StoreError, StoreLayout};
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_STAGE_ERROR: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_VALIDATION_FAILED: u8 = 3;
pub const EXIT_CRASHED: u8 = 4;

const RECOVERY_NOTICE: &str = "The target directory may be in an indeterminate state. \
Restore it from a backup, then run `sluice clear-marker`.";

/// A command failure with its exit code.
#[derive(Debug)]
pub struct Failure {
    pub code: u8,
    pub message: String,
    pub results: Vec<ValidationResult>,
}

impl Failure {
    pub fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            results: Vec::new(),
        }
    }

    pub fn report(&self, json: bool) {
        if json {
            let payload = serde_json::json!({
                "status": "error",
                "exit_code": self.code,
                "message": self.message,
                "results": self.results,
            });
            match json_pretty(&payload) {
                Ok(s) => println!("{s}"),
                Err(e) => eprintln!("error: {e}"),
            }
            return;
        }
        eprintln!("error: {}", self.message);
        if self.code == EXIT_CRASHED {
            eprintln!("{RECOVERY_NOTICE}");
        }
    }
}

impl From<CoreError> for Failure {
    fn from(e: CoreError) -> Self {
        let code = if e.is_validation() {
            EXIT_VALIDATION_FAILED
        } else if e.is_crashed() {
            EXIT_CRASHED
        } else if matches!(e, CoreError::Config(_)) {
            EXIT_CONFIG_ERROR
        } else {
            EXIT_STAGE_ERROR
        };
        Self {
            code,
            message: e.to_string(),
            results: e.results().to_vec(),
        }
    }
}

impl From<StoreError> for Failure {
    fn from(e: StoreError) -> Self {
        Self::new(EXIT_STAGE_ERROR, format!("store error: {e}"))
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self::new(EXIT_STAGE_ERROR, message)
    }
}

/// Everything a stage command needs, resolved once from flags and config.
pub struct Context {
    pub config: SluiceConfig,
    pub layout: StoreLayout,
    pub owner: OwnerId,
    pub json: bool,
}

fn default_owner() -> String {
    std::env::var("SLUICE_OWNER")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "sluice".to_owned())
}

impl Context {
    pub fn load(
        config_path: &Path,
        store_path: &Path,
        owner: Option<String>,
        json: bool,
    ) -> Result<Self, Failure> {
        let config = parse_config_file(config_path).map_err(|e| {
            Failure::new(
                EXIT_CONFIG_ERROR,
                format!("config error ({}): {e}", config_path.display()),
            )
        })?;
        let layout = StoreLayout::new(store_path);
        layout.initialize()?;
        let owner = OwnerId::new(owner.unwrap_or_else(default_owner));
        tracing::debug!(
            config = %config_path.display(),
            store = %store_path.display(),
            %owner,
            backend = %config.engine.backend,
            "context loaded"
        );
        Ok(Self {
            config,
            layout,
            owner,
            json,
        })
    }

    /// A stage for the configured target with the built-in validators.
    pub fn stage(&self) -> Result<Stage, Failure> {
        let engine = select_engine(&self.config.engine.backend, &self.config.engine.package_manager)
            .map_err(|e| Failure::new(EXIT_CONFIG_ERROR, format!("config error: {e}")))?;
        let pipeline = ValidatorPipeline::new()
            .with(TargetDirectoryValidator)
            .with(StagingRootValidator);
        Ok(Stage::from_config(
            stage_type!("sluice-cli"),
            self.owner.clone(),
            &self.layout,
            &self.config,
            engine,
        )
        .with_pipeline(pipeline))
    }

    /// A stage already claimed for `id`.
    pub fn claimed(&self, id: &str) -> Result<Stage, Failure> {
        let mut stage = self.stage()?;
        stage.claim(&StageId::new(id))?;
        Ok(stage)
    }

    /// Fail early when the engine's external tools are missing.
    pub fn check_prereqs(&self) -> Result<(), Failure> {
        if self.config.engine.backend != "rsync"
            || std::env::var("SLUICE_SKIP_PREREQS").as_deref() == Ok("1")
        {
            return Ok(());
        }
        let missing = check_rsync_prereqs(&self.config.engine.package_manager);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Failure::new(EXIT_STAGE_ERROR, format_missing(&missing)))
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.config.engine.timeout_secs.map(Duration::from_secs)
    }

    pub fn apply_timeout(&self) -> Option<Duration> {
        self.config.engine.apply_timeout_secs.map(Duration::from_secs)
    }

    /// A spinner for human output, `None` in JSON mode.
    pub fn spinner(&self, msg: &str) -> Option<ProgressBar> {
        (!self.json).then(|| spinner(msg))
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn template(pattern: &str) -> ProgressStyle {
    ProgressStyle::with_template(pattern).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        template("{spinner:.cyan} {msg}")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: Option<&ProgressBar>, msg: &str) {
    if let Some(pb) = pb {
        pb.set_style(template("{msg}"));
        pb.finish_with_message(format!("✓ {msg}"));
    }
}

pub fn spin_fail(pb: Option<&ProgressBar>, msg: &str) {
    if let Some(pb) = pb {
        pb.set_style(template("{msg}"));
        pb.finish_with_message(format!("✗ {msg}"));
    }
}

pub fn colorize_state(state: StageState) -> String {
    use console::Style;
    let text = state.to_string();
    match state {
        StageState::Created | StageState::Modifying => Style::new().green().apply_to(text),
        StageState::Applying => Style::new().cyan().bold().apply_to(text),
        StageState::Applied => Style::new().blue().apply_to(text),
        StageState::Unavailable | StageState::Destroyed => Style::new().dim().apply_to(text),
    }
    .to_string()
}

pub fn print_results(results: &[ValidationResult]) {
    for r in results {
        println!("{r}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn colorize_state_keeps_name() {
        for state in [
            StageState::Unavailable,
            StageState::Created,
            StageState::Applying,
            StageState::Applied,
        ] {
            assert!(colorize_state(state).contains(&state.to_string()));
        }
    }

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_STAGE_ERROR,
            EXIT_CONFIG_ERROR,
            EXIT_VALIDATION_FAILED,
            EXIT_CRASHED,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn core_errors_map_to_exit_codes() {
        let validation = Failure::from(CoreError::Validation {
            phase: sluice_schema::Phase::PreApply,
            results: vec![ValidationResult::single_error("no")],
        });
        assert_eq!(validation.code, EXIT_VALIDATION_FAILED);
        assert_eq!(validation.results.len(), 1);

        let crashed = Failure::from(CoreError::CrashedState("marker".to_owned()));
        assert_eq!(crashed.code, EXIT_CRASHED);

        let applied = Failure::from(CoreError::ApplyFailed {
            message: "boom".to_owned(),
        });
        assert_eq!(applied.code, EXIT_CRASHED);

        assert_eq!(Failure::from(CoreError::AlreadyExists).code, EXIT_STAGE_ERROR);
    }

    #[test]
    fn missing_config_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Context::load(
            &dir.path().join("absent.toml"),
            &dir.path().join("store"),
            None,
            false,
        )
        .err()
        .unwrap();
        assert_eq!(err.code, EXIT_CONFIG_ERROR);
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("testing...");
        spin_ok(Some(&pb), "done");
        spin_fail(None, "ignored");
    }
}
