//! Post-update hooks
//!
//! Hooks run in order after the work tree has been synced. The first
//! failing hook aborts the update. The toolkit's own routines (config
//! validation, dependency installation) are invoked as external commands.

use crate::cancel::{run_blocking, CancelFlag};
use crate::error::{ApplyPhase, Result, UpdateError};
use crate::scheduler::SystemManager;
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{HookSettings, VersionRef};
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// What a hook gets to see of the update
#[derive(Debug, Clone)]
pub struct HookContext<'a> {
    pub install_dir: &'a Path,
    pub config_dir: &'a Path,
    pub version: &'a VersionRef,
}

#[async_trait]
pub trait PostUpdateHook: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &HookContext<'_>) -> Result<()>;
}

/// The standard hooks, in the order they run
pub fn default_hooks(
    settings: &HookSettings,
    system: Arc<dyn SystemManager>,
    unit_files: Vec<PathBuf>,
) -> Vec<Arc<dyn PostUpdateHook>> {
    let timeout = Duration::from_secs(settings.timeout_secs);
    vec![
        Arc::new(ConfigValidationHook::new(
            settings.validate_command.clone(),
            timeout,
        )),
        Arc::new(DependencyHook::new(
            settings.required_tools.clone(),
            settings.tools_manifest.clone(),
            settings.install_command.clone(),
            timeout,
        )),
        Arc::new(ServiceReloadHook::new(
            system,
            unit_files,
            settings.reload_services,
        )),
    ]
}

fn hook_error(hook: &str, message: impl std::fmt::Display) -> UpdateError {
    UpdateError::apply_failed(ApplyPhase::Hooks, format!("{}: {}", hook, message))
}

/// Run `argv` in `cwd` with `envs`, bounded by `timeout`
async fn run_command(
    hook: &str,
    argv: &[String],
    cwd: &Path,
    envs: &[(&str, String)],
    timeout: Duration,
) -> Result<()> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| hook_error(hook, "empty command"))?;

    debug!("{}: running {:?} in {}", hook, argv, cwd.display());
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in envs {
        cmd.env(key, value);
    }

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(hook_error(hook, format!("cannot run {}: {}", program, e))),
        Err(_) => {
            return Err(hook_error(
                hook,
                format!("{} timed out after {}s", program, timeout.as_secs()),
            ))
        }
    };

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        debug!("{}: {}", hook, line);
    }
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.trim().lines().last().unwrap_or("no output");
        return Err(hook_error(
            hook,
            format!("{} exited with {}: {}", program, output.status, detail),
        ));
    }
    Ok(())
}

/// Validates the toolkit's configuration against the updated tree
pub struct ConfigValidationHook {
    command: Option<Vec<String>>,
    timeout: Duration,
}

impl ConfigValidationHook {
    pub fn new(command: Option<Vec<String>>, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl PostUpdateHook for ConfigValidationHook {
    fn name(&self) -> &str {
        "config-validation"
    }

    async fn run(&self, ctx: &HookContext<'_>) -> Result<()> {
        if let Some(command) = &self.command {
            let envs = [
                ("STRATA_CONFIG_DIR", ctx.config_dir.display().to_string()),
                ("STRATA_VERSION", ctx.version.to_string()),
            ];
            return run_command(self.name(), command, ctx.install_dir, &envs, self.timeout).await;
        }

        if !ctx.config_dir.is_dir() {
            debug!(
                "No configuration directory at {}, nothing to validate",
                ctx.config_dir.display()
            );
            return Ok(());
        }

        let dir = ctx.config_dir.to_path_buf();
        let checked = run_blocking(&CancelFlag::new(), None, "config validation", move |_| {
            check_config_syntax(&dir).map_err(|e| hook_error("config-validation", e))
        })
        .await?;
        debug!("Validated {} configuration files", checked);
        Ok(())
    }
}

/// Parse every YAML/JSON file under `dir`; returns how many were checked
fn check_config_syntax(dir: &Path) -> std::result::Result<usize, String> {
    let mut checked = 0;
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| e.to_string())?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        if !matches!(ext, "yaml" | "yml" | "json") {
            continue;
        }

        let content = fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        let parsed = if ext == "json" {
            serde_json::from_str::<serde_json::Value>(&content)
                .map(drop)
                .map_err(|e| e.to_string())
        } else {
            serde_yaml_ng::from_str::<serde_yaml_ng::Value>(&content)
                .map(drop)
                .map_err(|e| e.to_string())
        };
        if let Err(e) = parsed {
            return Err(format!("{} is invalid: {}", path.display(), e));
        }
        checked += 1;
    }
    Ok(checked)
}

/// Makes sure the tools the updated toolkit needs are installed
pub struct DependencyHook {
    required: Vec<String>,
    manifest: Option<PathBuf>,
    install_command: Option<Vec<String>>,
    timeout: Duration,
}

impl DependencyHook {
    pub fn new(
        required: Vec<String>,
        manifest: Option<PathBuf>,
        install_command: Option<Vec<String>>,
        timeout: Duration,
    ) -> Self {
        Self {
            required,
            manifest,
            install_command,
            timeout,
        }
    }

    /// Wanted tools and the subset not found on `PATH`
    async fn check_tools(&self, install_dir: &Path) -> Result<(Vec<String>, Vec<String>)> {
        let required = self.required.clone();
        let manifest = self.manifest.clone();
        let install_dir = install_dir.to_path_buf();
        run_blocking(&CancelFlag::new(), None, "tool check", move |_| {
            let tools = wanted_tools(&required, manifest.as_deref(), &install_dir);
            let missing = missing_tools(&tools);
            Ok((tools, missing))
        })
        .await
    }
}

/// Configured tools plus those listed in the manifest of the updated tree
fn wanted_tools(required: &[String], manifest: Option<&Path>, install_dir: &Path) -> Vec<String> {
    let mut tools = required.to_vec();
    if let Some(manifest) = manifest {
        let path = install_dir.join(manifest);
        match fs::read_to_string(&path) {
            Ok(content) => tools.extend(parse_tools_manifest(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No tools manifest at {}", path.display())
            }
            Err(e) => warn!("Cannot read tools manifest {}: {}", path.display(), e),
        }
    }
    tools.sort();
    tools.dedup();
    tools
}

/// One tool per line; `#` starts a comment
pub fn parse_tools_manifest(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn missing_tools(tools: &[String]) -> Vec<String> {
    tools
        .iter()
        .filter(|tool| which::which(tool.as_str()).is_err())
        .cloned()
        .collect()
}

#[async_trait]
impl PostUpdateHook for DependencyHook {
    fn name(&self) -> &str {
        "dependencies"
    }

    async fn run(&self, ctx: &HookContext<'_>) -> Result<()> {
        let (tools, missing) = self.check_tools(ctx.install_dir).await?;
        if missing.is_empty() {
            debug!("All {} required tools present", tools.len());
            return Ok(());
        }

        let Some(command) = &self.install_command else {
            return Err(hook_error(
                self.name(),
                format!("missing required tools: {}", missing.join(", ")),
            ));
        };

        info!("Installing missing tools: {}", missing.join(", "));
        let envs = [
            ("STRATA_MISSING_TOOLS", missing.join(" ")),
            ("STRATA_CONFIG_DIR", ctx.config_dir.display().to_string()),
        ];
        run_command(self.name(), command, ctx.install_dir, &envs, self.timeout).await?;

        let recheck = missing.clone();
        let still_missing = run_blocking(&CancelFlag::new(), None, "tool check", move |_| {
            Ok(missing_tools(&recheck))
        })
        .await?;
        if !still_missing.is_empty() {
            return Err(hook_error(
                self.name(),
                format!(
                    "still missing after install: {}",
                    still_missing.join(", ")
                ),
            ));
        }
        Ok(())
    }
}

/// Reloads service definitions so updated unit files take effect
pub struct ServiceReloadHook {
    system: Arc<dyn SystemManager>,
    unit_files: Vec<PathBuf>,
    enabled: bool,
}

impl ServiceReloadHook {
    pub fn new(system: Arc<dyn SystemManager>, unit_files: Vec<PathBuf>, enabled: bool) -> Self {
        Self {
            system,
            unit_files,
            enabled,
        }
    }
}

#[async_trait]
impl PostUpdateHook for ServiceReloadHook {
    fn name(&self) -> &str {
        "service-reload"
    }

    async fn run(&self, _ctx: &HookContext<'_>) -> Result<()> {
        if !self.enabled {
            debug!("Service reload disabled");
            return Ok(());
        }
        if !self.unit_files.iter().any(|unit| unit.exists()) {
            debug!("No installed unit files, skipping service reload");
            return Ok(());
        }
        if !self.system.is_available() {
            debug!("System manager not available, skipping service reload");
            return Ok(());
        }

        self.system
            .daemon_reload()
            .await
            .map_err(|e| hook_error(self.name(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx<'a>(install: &'a Path, config: &'a Path, version: &'a VersionRef) -> HookContext<'a> {
        HookContext {
            install_dir: install,
            config_dir: config,
            version,
        }
    }

    #[test]
    fn test_parse_tools_manifest() {
        let tools = parse_tools_manifest("git\n# comment\n\n  curl  # http\njq\n");
        assert_eq!(tools, vec!["git", "curl", "jq"]);
    }

    #[tokio::test]
    async fn test_config_validation_accepts_valid_files() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("conf/nested")).unwrap();
        fs::write(temp.path().join("conf/a.yaml"), "key: value\n").unwrap();
        fs::write(temp.path().join("conf/nested/b.json"), "{\"k\": 1}").unwrap();
        fs::write(temp.path().join("conf/notes.txt"), "{{{ not parsed").unwrap();

        let version = VersionRef::from("v1");
        let hook = ConfigValidationHook::new(None, Duration::from_secs(5));
        hook.run(&ctx(temp.path(), &temp.path().join("conf"), &version))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_config_validation_rejects_broken_yaml() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("conf")).unwrap();
        fs::write(temp.path().join("conf/a.yml"), "key: [unterminated\n").unwrap();

        let version = VersionRef::from("v1");
        let hook = ConfigValidationHook::new(None, Duration::from_secs(5));
        let err = hook
            .run(&ctx(temp.path(), &temp.path().join("conf"), &version))
            .await
            .unwrap_err();
        match err {
            UpdateError::ApplyFailed { phase, message, .. } => {
                assert_eq!(phase, ApplyPhase::Hooks);
                assert!(message.contains("a.yml"), "got: {}", message);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_config_validation_missing_dir_is_ok() {
        let temp = TempDir::new().unwrap();
        let version = VersionRef::from("v1");
        let hook = ConfigValidationHook::new(None, Duration::from_secs(5));
        hook.run(&ctx(temp.path(), &temp.path().join("absent"), &version))
            .await
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_validation_command_failure() {
        let temp = TempDir::new().unwrap();
        let version = VersionRef::from("v1");
        let hook = ConfigValidationHook::new(
            Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo bad config >&2; exit 3".to_string(),
            ]),
            Duration::from_secs(5),
        );
        let err = hook
            .run(&ctx(temp.path(), temp.path(), &version))
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("bad config"), "got: {}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_timeout() {
        let temp = TempDir::new().unwrap();
        let version = VersionRef::from("v1");
        let hook = ConfigValidationHook::new(
            Some(vec!["sleep".to_string(), "5".to_string()]),
            Duration::from_millis(100),
        );
        let err = hook
            .run(&ctx(temp.path(), temp.path(), &version))
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("timed out"), "got: {}", err);
    }

    #[test]
    fn test_wanted_tools_merges_manifest() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("tools.txt"), "jq # json\ngit\n").unwrap();

        let tools = wanted_tools(
            &["git".to_string(), "curl".to_string()],
            Some(Path::new("tools.txt")),
            temp.path(),
        );
        assert_eq!(tools, vec!["curl", "git", "jq"]);

        let tools = wanted_tools(&["git".to_string()], Some(Path::new("absent.txt")), temp.path());
        assert_eq!(tools, vec!["git"]);
    }

    #[tokio::test]
    async fn test_dependency_hook_reports_missing_tools() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("requirements")).unwrap();
        fs::write(
            temp.path().join("requirements/tools.txt"),
            "strata-test-tool-that-does-not-exist\n",
        )
        .unwrap();

        let version = VersionRef::from("v1");
        let hook = DependencyHook::new(
            vec![],
            Some(PathBuf::from("requirements/tools.txt")),
            None,
            Duration::from_secs(5),
        );
        let err = hook
            .run(&ctx(temp.path(), temp.path(), &version))
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("strata-test-tool-that-does-not-exist"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dependency_hook_passes_when_tools_present() {
        let temp = TempDir::new().unwrap();
        let version = VersionRef::from("v1");
        let hook = DependencyHook::new(
            vec!["sh".to_string()],
            None,
            None,
            Duration::from_secs(5),
        );
        hook.run(&ctx(temp.path(), temp.path(), &version))
            .await
            .unwrap();
    }
}
