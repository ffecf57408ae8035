// src/sys/frontend.rs

use secrecy::ExposeSecret;
use tracing::{info, warn};

use crate::config::SetupConfig;
use crate::sys::directive::{ConfigMutator, Outcome};
use crate::sys::files::render_tokens;
use crate::sys::secrets::Environment;

/// `(directive, variable, default)` for the frontend's PHP overrides.
pub const PHP_DIRECTIVES: &[(&str, &str, &str)] = &[
    ("max_execution_time", "ZBX_MAXEXECUTIONTIME", "600"),
    ("memory_limit", "ZBX_MEMORYLIMIT", "128M"),
    ("post_max_size", "ZBX_POSTMAXSIZE", "16M"),
    ("upload_max_filesize", "ZBX_UPLOADMAXFILESIZE", "2M"),
    ("max_input_time", "ZBX_MAXINPUTTIME", "300"),
    ("date.timezone", "PHP_TZ", "Europe/Riga"),
];

/// Body of a single-quoted PHP string literal.
pub fn php_quote(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Placeholder values for `zabbix.conf.php`. Everything lands inside a quoted
/// string except the history storage type list, which is a PHP array literal.
pub fn web_conf_tokens(config: &SetupConfig) -> Vec<(&'static str, String)> {
    let db = &config.db;
    let env = &config.env;
    vec![
        ("DB_SERVER_HOST", php_quote(&db.host)),
        ("DB_SERVER_PORT", db.port.to_string()),
        ("DB_SERVER_DBNAME", php_quote(&db.database)),
        ("DB_SERVER_SCHEMA", String::new()),
        ("DB_SERVER_USER", php_quote(&db.app_user)),
        ("DB_SERVER_PASS", php_quote(db.app_password.expose_secret())),
        ("ZBX_SERVER_HOST", php_quote(&config.server_host())),
        ("ZBX_SERVER_PORT", php_quote(&env.get_or("ZBX_SERVER_PORT", "10051"))),
        ("ZBX_SERVER_NAME", php_quote(&env.get_or("ZBX_SERVER_NAME", ""))),
        ("ZBX_HISTORYSTORAGEURL", php_quote(&env.get_or("ZBX_HISTORYSTORAGEURL", ""))),
        ("ZBX_HISTORYSTORAGETYPES", env.get_or("ZBX_HISTORYSTORAGETYPES", "[]")),
    ]
}

/// Normalises the maintenance-mode variables read by `maintenance.inc.php`
/// at request time.
pub fn export_maintenance(env: &mut Environment) {
    let deny = if env.flag("ZBX_DENY_GUI_ACCESS") { "true" } else { "false" };
    let ip_range = env.get_or("ZBX_GUI_ACCESS_IP_RANGE", "['127.0.0.1']");
    let message = env.get_or("ZBX_GUI_WARNING_MSG", "Zabbix is under maintenance.");

    env.set("ZBX_DENY_GUI_ACCESS", deny);
    env.set("ZBX_GUI_ACCESS_IP_RANGE", &ip_range);
    env.set("ZBX_GUI_WARNING_MSG", &message);
}

/// PHP overrides plus the frontend's DB/server connection file. Nothing in
/// here is fatal.
pub async fn prepare_frontend(mutator: &ConfigMutator, config: &SetupConfig) -> usize {
    info!("** Preparing Zabbix frontend configuration file");

    let php_ini = &config.paths.php_ini;
    let mut failures = 0;
    for &(directive, var, default) in PHP_DIRECTIVES {
        let value = config.env.get_or(var, default);
        if mutator.set(php_ini, directive, &value).await == Outcome::Failed {
            failures += 1;
        }
    }

    let web_conf = config.paths.web_conf();
    match render_tokens(&web_conf, &web_conf_tokens(config)).await {
        Ok(true) => info!("** Updated '{}'", web_conf.display()),
        Ok(false) => {}
        Err(e) => {
            warn!("**** Failed to render '{}': {}", web_conf.display(), e);
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

    const WEB_TEMPLATE: &str = "<?php
$DB['TYPE']     = 'MYSQL';
$DB['SERVER']   = '{DB_SERVER_HOST}';
$DB['PORT']     = '{DB_SERVER_PORT}';
$DB['DATABASE'] = '{DB_SERVER_DBNAME}';
$DB['USER']     = '{DB_SERVER_USER}';
$DB['PASSWORD'] = '{DB_SERVER_PASS}';
$DB['SCHEMA'] = '{DB_SERVER_SCHEMA}';
$ZBX_SERVER      = '{ZBX_SERVER_HOST}';
$ZBX_SERVER_PORT = '{ZBX_SERVER_PORT}';
$ZBX_SERVER_NAME = '{ZBX_SERVER_NAME}';
$HISTORY['url']   = '{ZBX_HISTORYSTORAGEURL}';
$HISTORY['types'] = {ZBX_HISTORYSTORAGETYPES};
";

    fn setup(pairs: &[(&str, &str)]) -> (TempDir, SetupConfig) {
        let dir = TempDir::new().unwrap();
        let paths = Paths::under(dir.path());
        fs::create_dir_all(paths.web_conf().parent().unwrap()).unwrap();
        fs::create_dir_all(paths.php_ini.parent().unwrap()).unwrap();
        fs::write(paths.web_conf(), WEB_TEMPLATE).unwrap();
        fs::write(&paths.php_ini, "; memory_limit=64M\nmax_execution_time=300\n").unwrap();

        let env = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        (dir, SetupConfig::resolve(env, paths).unwrap())
    }

    #[tokio::test]
    async fn renders_connection_file_with_php_escaping() {
        let (_dir, config) = setup(&[
            ("ZBX_TYPE", "web"),
            ("MYSQL_USER", "zbx"),
            ("MYSQL_PASSWORD", "it's\\here"),
            ("ZBX_SERVER_NAME", "Prod"),
        ]);
        let mutator = ConfigMutator::new(Box::new(NativeEditor), config.paths.secrets_dir());

        assert_eq!(prepare_frontend(&mutator, &config).await, 0);

        let rendered = fs::read_to_string(config.paths.web_conf()).unwrap();
        assert!(rendered.contains("$DB['SERVER']   = 'mysql-server';"));
        assert!(rendered.contains("$DB['PORT']     = '3306';"));
        assert!(rendered.contains("$DB['PASSWORD'] = 'it\\'s\\\\here';"));
        assert!(rendered.contains("$DB['SCHEMA'] = '';"));
        assert!(rendered.contains("$ZBX_SERVER      = 'zabbix-server';"));
        assert!(rendered.contains("$ZBX_SERVER_PORT = '10051';"));
        assert!(rendered.contains("$ZBX_SERVER_NAME = 'Prod';"));
        assert!(rendered.contains("$HISTORY['types'] = [];"));
        assert!(!rendered.contains('{'));
    }

    #[tokio::test]
    async fn php_overrides_follow_environment() {
        let (_dir, config) = setup(&[("MYSQL_USER", "zbx"), ("ZBX_MEMORYLIMIT", "256M")]);
        let mutator = ConfigMutator::new(Box::new(NativeEditor), config.paths.secrets_dir());

        prepare_frontend(&mutator, &config).await;

        let ini = fs::read_to_string(&config.paths.php_ini).unwrap();
        assert!(ini.contains("max_execution_time=600\n"));
        assert!(ini.contains("; memory_limit=64M\nmemory_limit=256M\n"));
    }

    #[tokio::test]
    async fn missing_files_are_not_fatal() {
        let (_dir, config) = setup(&[("MYSQL_USER", "zbx")]);
        fs::remove_file(config.paths.web_conf()).unwrap();
        fs::remove_file(&config.paths.php_ini).unwrap();
        let mutator = ConfigMutator::new(Box::new(NativeEditor), config.paths.secrets_dir());

        assert_eq!(prepare_frontend(&mutator, &config).await, 0);
    }

    #[test]
    fn maintenance_defaults() {
        let mut env: Environment = [("ZBX_DENY_GUI_ACCESS".to_string(), "TRUE".to_string())]
            .into_iter()
            .collect();
        export_maintenance(&mut env);

        assert_eq!(env.get("ZBX_DENY_GUI_ACCESS"), Some("true"));
        assert_eq!(env.get("ZBX_GUI_ACCESS_IP_RANGE"), Some("['127.0.0.1']"));
        assert_eq!(env.get("ZBX_GUI_WARNING_MSG"), Some("Zabbix is under maintenance."));

        let mut env = Environment::default();
        export_maintenance(&mut env);
        assert_eq!(env.get("ZBX_DENY_GUI_ACCESS"), Some("false"));
    }
}
