// src/sys/gateway.rs

use std::path::Path;

use regex::Regex;
use tokio::fs;
use tracing::{info, warn};

use crate::config::SetupConfig;
use crate::sys::directive::{ConfigMutator, Outcome};
use crate::sys::files::write_atomically;

/// `settings.sh` keys and the variables that feed them.
pub const GATEWAY_SETTINGS: &[(&str, &str)] = &[
    ("LISTEN_IP", "ZBX_JAVAGATEWAY_LISTEN_IP"),
    ("START_POLLERS", "ZBX_JAVAGATEWAY_START_POLLERS"),
    ("TIMEOUT", "ZBX_JAVAGATEWAY_TIMEOUT"),
];

/// Maps the server's numeric `DebugLevel` onto a logback level. Named levels
/// pass through.
pub fn logback_level(debug_level: &str) -> String {
    match debug_level {
        "0" | "1" => "error".to_string(),
        "2" => "warn".to_string(),
        "3" => "info".to_string(),
        "4" => "debug".to_string(),
        "5" => "trace".to_string(),
        other => other.to_ascii_lowercase(),
    }
}

fn set_root_level(xml: &str, level: &str) -> Result<String, String> {
    let root = Regex::new(r#"<root level="[^"]*">"#).map_err(|e| e.to_string())?;
    Ok(root
        .replace_all(xml, format!(r#"<root level="{level}">"#).as_str())
        .into_owned())
}

async fn update_logback(path: &Path, level: &str) -> Result<bool, String> {
    let xml = match fs::read_to_string(path).await {
        Ok(xml) => xml,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("**** Configuration file '{}' does not exist", path.display());
            return Ok(false);
        }
        Err(e) => return Err(format!("Failed to read '{}': {}", path.display(), e)),
    };

    let updated = set_root_level(&xml, level)?;
    if updated == xml {
        return Ok(false);
    }
    write_atomically(path, &updated)?;
    Ok(true)
}

/// Logging level and listener settings for the bundled Java gateway. Only the
/// appliance ships it; missing files are skipped with a warning.
pub async fn prepare_java_gateway(mutator: &ConfigMutator, config: &SetupConfig) -> usize {
    info!("** Preparing Zabbix Java Gateway");

    let mut failures = 0;
    let env = &config.env;

    if let Some(level) = env.get("ZBX_DEBUGLEVEL") {
        let logback = config.paths.java_logback();
        if let Err(e) = update_logback(&logback, &logback_level(level)).await {
            warn!("**** Failed to update '{}': {}", logback.display(), e);
            failures += 1;
        }
    }

    let settings = config.paths.java_settings();
    for &(key, var) in GATEWAY_SETTINGS {
        let value = env.get_or(var, "");
        if mutator.set(&settings, key, &value).await == Outcome::Failed {
            failures += 1;
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Paths;
    use crate::sys::directive::NativeEditor;
    use std::fs;
    use tempfile::TempDir;

    const LOGBACK: &str = r#"<configuration scan="true" scanPeriod="15 seconds">
	<root level="info">
		<appender-ref ref="STDOUT" />
	</root>
</configuration>
"#;

    const SETTINGS: &str = "\
# This is a configuration file for Zabbix Java Gateway.

# LISTEN_IP=\"0.0.0.0\"

# LISTEN_PORT=10052

# START_POLLERS=5

# TIMEOUT=3
";

    fn setup(pairs: &[(&str, &str)]) -> (TempDir, SetupConfig) {
        let dir = TempDir::new().unwrap();
        let paths = Paths::under(dir.path());
        fs::create_dir_all(&paths.etc_dir).unwrap();
        fs::create_dir_all(&paths.java_gateway_dir).unwrap();
        fs::write(paths.java_logback(), LOGBACK).unwrap();
        fs::write(paths.java_settings(), SETTINGS).unwrap();

        let env = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        (dir, SetupConfig::resolve(env, paths).unwrap())
    }

    #[test]
    fn numeric_debug_levels_map_to_logback() {
        assert_eq!(logback_level("0"), "error");
        assert_eq!(logback_level("3"), "info");
        assert_eq!(logback_level("4"), "debug");
        assert_eq!(logback_level("5"), "trace");
        assert_eq!(logback_level("WARN"), "warn");
    }

    #[tokio::test]
    async fn writes_level_and_settings() {
        let (_dir, config) = setup(&[
            ("ZBX_DEBUGLEVEL", "4"),
            ("ZBX_JAVAGATEWAY_START_POLLERS", "10"),
            ("ZBX_JAVAGATEWAY_TIMEOUT", "6"),
        ]);
        let mutator = ConfigMutator::new(Box::new(NativeEditor), config.paths.secrets_dir());

        assert_eq!(prepare_java_gateway(&mutator, &config).await, 0);

        let xml = fs::read_to_string(config.paths.java_logback()).unwrap();
        assert!(xml.contains(r#"<root level="debug">"#));

        let settings = fs::read_to_string(config.paths.java_settings()).unwrap();
        assert!(settings.contains("# START_POLLERS=5\nSTART_POLLERS=10\n"));
        assert!(settings.contains("# TIMEOUT=3\nTIMEOUT=6\n"));
        assert!(!settings.lines().any(|l| l.starts_with("LISTEN_IP=")));
    }

    #[tokio::test]
    async fn logback_untouched_without_debug_level() {
        let (_dir, config) = setup(&[]);
        let mutator = ConfigMutator::new(Box::new(NativeEditor), config.paths.secrets_dir());

        prepare_java_gateway(&mutator, &config).await;
        assert_eq!(fs::read_to_string(config.paths.java_logback()).unwrap(), LOGBACK);
    }

    #[tokio::test]
    async fn missing_gateway_files_are_skipped() {
        let (_dir, config) = setup(&[("ZBX_DEBUGLEVEL", "2")]);
        fs::remove_file(config.paths.java_logback()).unwrap();
        fs::remove_file(config.paths.java_settings()).unwrap();
        let mutator = ConfigMutator::new(Box::new(NativeEditor), config.paths.secrets_dir());

        assert_eq!(prepare_java_gateway(&mutator, &config).await, 0);
        assert!(!config.paths.java_settings().exists());
    }
}
