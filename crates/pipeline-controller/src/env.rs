//! Pipeline environment
//!
//! The setup script is sourced in a child shell and its resulting
//! environment captured as a map. The map is handed to the pipeline spawn;
//! the launcher's own environment is never modified.

use std::collections::HashMap;
use std::process::{Command, Stdio};
use tracing::{debug, info};

use crate::config::EnvironmentConfig;
use crate::error::EnvError;

/// Environment passed to the pipeline process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineEnv {
    vars: HashMap<String, String>,
}

impl PipelineEnv {
    /// Build from explicit variables
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Source the setup script and verify the required variables
    pub fn source(config: &EnvironmentConfig) -> Result<Self, EnvError> {
        let script = config.setup_script.display().to_string();
        info!("Sourcing pipeline environment from {}", script);

        let output = Command::new(&config.shell)
            .arg("-c")
            .arg(". \"$1\" && env -0")
            .arg("setup-env")
            .arg(&config.setup_script)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| EnvError::Source {
                script: script.clone(),
                reason: format!("failed to run {}: {}", config.shell, e),
            })?;

        if !output.status.success() {
            return Err(EnvError::Source {
                script,
                reason: format!(
                    "{} ({})",
                    String::from_utf8_lossy(&output.stderr).trim(),
                    output.status
                ),
            });
        }

        let env = Self::from_vars(parse_env_block(&String::from_utf8_lossy(&output.stdout)));
        debug!("Captured {} environment variables", env.len());

        env.require(&config.required, &script)?;
        Ok(env)
    }

    /// Fail with the first required variable that is missing
    pub fn require(&self, required: &[String], script: &str) -> Result<(), EnvError> {
        match required.iter().find(|name| !self.vars.contains_key(name.as_str())) {
            Some(name) => Err(EnvError::MissingVariable {
                name: name.clone(),
                script: script.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn vars(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Parse NUL-separated `KEY=VALUE` entries (`env -0` output)
fn parse_env_block(block: &str) -> impl Iterator<Item = (&str, &str)> {
    block
        .split('\0')
        .filter_map(|entry| entry.split_once('='))
        .filter(|(key, _)| !key.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_script(name: &str, body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}.sh", name, std::process::id()));
        std::fs::write(&path, body).unwrap();
        path
    }

    fn config(script: PathBuf) -> EnvironmentConfig {
        EnvironmentConfig {
            shell: "sh".to_string(),
            setup_script: script,
            required: vec!["TAPPAS_POST_PROC_DIR".to_string()],
        }
    }

    #[test]
    fn test_parse_env_block() {
        let vars: Vec<_> = parse_env_block("A=1\0B=x=y\0\0MULTI=line1\nline2\0").collect();
        assert_eq!(vars, vec![("A", "1"), ("B", "x=y"), ("MULTI", "line1\nline2")]);
    }

    #[test]
    fn test_source_captures_exports() {
        let script = write_script(
            "env-ok",
            "export TAPPAS_POST_PROC_DIR=/opt/tappas/post\nexport HAILO_ARCH=hailo8\n",
        );
        let env = PipelineEnv::source(&config(script.clone())).unwrap();
        std::fs::remove_file(&script).unwrap();

        assert_eq!(env.get("TAPPAS_POST_PROC_DIR"), Some("/opt/tappas/post"));
        assert_eq!(env.get("HAILO_ARCH"), Some("hailo8"));
    }

    #[test]
    fn test_source_missing_required_variable() {
        let script = write_script("env-missing", "export HAILO_ARCH=hailo8\n");
        let err = PipelineEnv::source(&config(script.clone())).unwrap_err();
        std::fs::remove_file(&script).unwrap();

        assert_eq!(
            err,
            EnvError::MissingVariable {
                name: "TAPPAS_POST_PROC_DIR".to_string(),
                script: script.display().to_string(),
            }
        );
    }

    #[test]
    fn test_source_missing_script() {
        let err = PipelineEnv::source(&config(PathBuf::from("/nonexistent/setup_env.sh")))
            .unwrap_err();
        assert!(matches!(err, EnvError::Source { .. }));
    }

    #[test]
    fn test_sourcing_leaves_process_env_untouched() {
        let script = write_script(
            "env-isolated",
            "export TAPPAS_POST_PROC_DIR=/opt/post\nexport LAUNCHER_ENV_PROBE=1\n",
        );
        PipelineEnv::source(&config(script.clone())).unwrap();
        std::fs::remove_file(&script).unwrap();

        assert!(std::env::var("LAUNCHER_ENV_PROBE").is_err());
    }
}
