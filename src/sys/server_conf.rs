// src/sys/server_conf.rs
//
// `zabbix_server.conf` generation. The server understands ~80 directives;
// the ones we manage are listed declaratively below instead of as one call
// per key.

use std::path::Path;

use secrecy::ExposeSecret;
use tracing::info;

use crate::config::SetupConfig;
use crate::sys::directive::{ConfigMutator, Outcome};
use crate::sys::secrets::Environment;

/// Where a directive's value comes from.
#[derive(Debug, Clone, Copy)]
pub enum Source {
    /// Environment variable; unset removes the directive.
    Env(&'static str),
    /// Environment variable with a fallback.
    EnvOr(&'static str, &'static str),
    Fixed(&'static str),
    /// Always removed (the container logs to stdout, no pid/log files).
    Remove,
    /// Path relative to the monitoring user's home directory.
    Home(&'static str),
    /// Comma-separated list, one directive line per item.
    Multi(&'static str),
}

use Source::{Env, EnvOr, Fixed, Home, Multi, Remove};

pub const SERVER_DIRECTIVES: &[(&str, Source)] = &[
    ("ListenPort", Env("ZBX_LISTENPORT")),
    ("SourceIP", Env("ZBX_SOURCEIP")),
    ("LogType", Fixed("console")),
    ("LogFile", Remove),
    ("LogFileSize", Remove),
    ("PidFile", Remove),
    ("DebugLevel", Env("ZBX_DEBUGLEVEL")),
    ("HistoryStorageURL", Env("ZBX_HISTORYSTORAGEURL")),
    ("HistoryStorageTypes", Env("ZBX_HISTORYSTORAGETYPES")),
    ("HistoryStorageDateIndex", Env("ZBX_HISTORYSTORAGEDATEINDEX")),
    ("ExportDir", Env("ZBX_EXPORTDIR")),
    ("ExportFileSize", Env("ZBX_EXPORTFILESIZE")),
    ("StartPollers", Env("ZBX_STARTPOLLERS")),
    ("StartIPMIPollers", Env("ZBX_IPMIPOLLERS")),
    ("StartPollersUnreachable", Env("ZBX_STARTPOLLERSUNREACHABLE")),
    ("StartTrappers", Env("ZBX_STARTTRAPPERS")),
    ("StartPingers", Env("ZBX_STARTPINGERS")),
    ("StartDiscoverers", Env("ZBX_STARTDISCOVERERS")),
    ("StartHTTPPollers", Env("ZBX_STARTHTTPPOLLERS")),
    ("StartPreprocessors", Env("ZBX_STARTPREPROCESSORS")),
    ("StartTimers", Env("ZBX_STARTTIMERS")),
    ("StartEscalators", Env("ZBX_STARTESCALATORS")),
    ("StartAlerters", Env("ZBX_STARTALERTERS")),
    ("StartLLDProcessors", Env("ZBX_STARTLLDPROCESSORS")),
    ("JavaGateway", EnvOr("ZBX_JAVAGATEWAY", "127.0.0.1")),
    ("JavaGatewayPort", Env("ZBX_JAVAGATEWAYPORT")),
    ("StartJavaPollers", EnvOr("ZBX_STARTJAVAPOLLERS", "5")),
    ("StartVMwareCollectors", Env("ZBX_STARTVMWARECOLLECTORS")),
    ("VMwareFrequency", Env("ZBX_VMWAREFREQUENCY")),
    ("VMwarePerfFrequency", Env("ZBX_VMWAREPERFFREQUENCY")),
    ("VMwareCacheSize", Env("ZBX_VMWARECACHESIZE")),
    ("VMwareTimeout", Env("ZBX_VMWARETIMEOUT")),
    ("HousekeepingFrequency", Env("ZBX_HOUSEKEEPINGFREQUENCY")),
    ("MaxHousekeeperDelete", Env("ZBX_MAXHOUSEKEEPERDELETE")),
    ("SenderFrequency", Env("ZBX_SENDERFREQUENCY")),
    ("CacheSize", Env("ZBX_CACHESIZE")),
    ("CacheUpdateFrequency", Env("ZBX_CACHEUPDATEFREQUENCY")),
    ("StartDBSyncers", Env("ZBX_STARTDBSYNCERS")),
    ("HistoryCacheSize", Env("ZBX_HISTORYCACHESIZE")),
    ("HistoryIndexCacheSize", Env("ZBX_HISTORYINDEXCACHESIZE")),
    ("TrendCacheSize", Env("ZBX_TRENDCACHESIZE")),
    ("ValueCacheSize", Env("ZBX_VALUECACHESIZE")),
    ("Timeout", Env("ZBX_TIMEOUT")),
    ("TrapperTimeout", Env("ZBX_TRAPPERIMEOUT")),
    ("UnreachablePeriod", Env("ZBX_UNREACHABLEPERIOD")),
    ("UnavailableDelay", Env("ZBX_UNAVAILABLEDELAY")),
    ("UnreachableDelay", Env("ZBX_UNREACHABLEDELAY")),
    ("AlertScriptsPath", Fixed("/usr/lib/zabbix/alertscripts")),
    ("ExternalScripts", Fixed("/usr/lib/zabbix/externalscripts")),
    ("FpingLocation", Env("ZBX_FPINGLOCATION")),
    ("Fping6Location", Env("ZBX_FPING6LOCATION")),
    ("SSHKeyLocation", Home("ssh_keys")),
    ("LogSlowQueries", Env("ZBX_LOGSLOWQUERIES")),
    ("StartProxyPollers", Env("ZBX_STARTPROXYPOLLERS")),
    ("ProxyConfigFrequency", Env("ZBX_PROXYCONFIGFREQUENCY")),
    ("ProxyDataFrequency", Env("ZBX_PROXYDATAFREQUENCY")),
    ("SSLCertLocation", Home("ssl/certs/")),
    ("SSLKeyLocation", Home("ssl/keys/")),
    ("SSLCALocation", Home("ssl/ssl_ca/")),
    ("LoadModulePath", Home("modules/")),
    ("LoadModule", Multi("ZBX_LOADMODULE")),
    ("TLSCAFile", Env("ZBX_TLSCAFILE")),
    ("TLSCRLFile", Env("ZBX_TLSCRLFILE")),
    ("TLSCertFile", Env("ZBX_TLSCERTFILE")),
    ("TLSKeyFile", Env("ZBX_TLSKEYFILE")),
];

fn single_value(source: Source, env: &Environment, home: &Path) -> String {
    match source {
        Env(var) | Multi(var) => env.get_or(var, ""),
        EnvOr(var, default) => env.get_or(var, default),
        Fixed(value) => value.to_string(),
        Remove => String::new(),
        Home(rel) => format!("{}/{}", home.display(), rel),
    }
}

/// Writes every managed directive into the server config. Returns the outcome
/// per key for the summary log.
pub async fn update_server_config(
    mutator: &ConfigMutator,
    config: &SetupConfig,
) -> Vec<(&'static str, Outcome)> {
    info!("** Preparing Zabbix server configuration file");

    let path = config.paths.server_conf();
    let env = &config.env;
    let db = &config.db;
    let mut outcomes = Vec::with_capacity(SERVER_DIRECTIVES.len() + 8);

    let port = db.port.to_string();
    let database_directives: [(&'static str, &str); 6] = [
        ("DBHost", db.host.as_str()),
        ("DBName", db.database.as_str()),
        // MySQL has no schemas inside a database.
        ("DBSchema", ""),
        ("DBPort", port.as_str()),
        ("DBUser", db.app_user.as_str()),
        ("DBPassword", db.app_password.expose_secret().as_str()),
    ];
    for (key, value) in database_directives {
        outcomes.push((key, mutator.set(&path, key, value).await));
    }

    for &(key, source) in SERVER_DIRECTIVES {
        match source {
            Multi(var) => {
                for outcome in mutator.set_multiple(&path, key, &env.get_or(var, "")).await {
                    outcomes.push((key, outcome));
                }
            }
            _ => {
                let value = single_value(source, env, &config.paths.user_home);
                outcomes.push((key, mutator.set(&path, key, &value).await));
            }
        }
    }

    let (trapper_file, trapper_enabled) = if env.flag("ZBX_ENABLE_SNMP_TRAPS") {
        (
            format!("{}/snmptraps/snmptraps.log", config.paths.user_home.display()),
            "1",
        )
    } else {
        (String::new(), "")
    };
    outcomes.push((
        "SNMPTrapperFile",
        mutator.set(&path, "SNMPTrapperFile", &trapper_file).await,
    ));
    outcomes.push((
        "StartSNMPTrapper",
        mutator.set(&path, "StartSNMPTrapper", trapper_enabled).await,
    ));

    let failed = outcomes.iter().filter(|(_, o)| *o == Outcome::Failed).count();
    info!(
        "** Zabbix server configuration: {} directives processed, {} failed",
        outcomes.len(),
        failed
    );
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Paths;
    use crate::sys::directive::NativeEditor;
    use std::fs;
    use tempfile::TempDir;

    const SHIPPED_CONF: &str = "\
### Option: ListenPort
# ListenPort=10051

### Option: LogType
# LogType=file

### Option: LogFile
LogFile=/tmp/zabbix_server.log

### Option: PidFile
# PidFile=/tmp/zabbix_server.pid

### Option: DBHost
# DBHost=localhost

### Option: DBName
# DBName=
DBName=zabbix

### Option: DBSchema
# DBSchema=

### Option: DBUser
# DBUser=
DBUser=zabbix

### Option: DBPassword
# DBPassword=

### Option: DBPort
# DBPort=

### Option: StartPollers
# StartPollers=5

### Option: JavaGateway
# JavaGateway=

### Option: StartJavaPollers
# StartJavaPollers=0

### Option: LoadModulePath
# LoadModulePath=${libdir}/modules

### Option: LoadModule
# LoadModule=

### Option: TLSCAFile
# TLSCAFile=

### Option: SNMPTrapperFile
# SNMPTrapperFile=/tmp/zabbix_traps.tmp

### Option: StartSNMPTrapper
# StartSNMPTrapper=0
";

    fn setup(pairs: &[(&str, &str)]) -> (TempDir, SetupConfig) {
        let dir = TempDir::new().unwrap();
        let paths = Paths::under(dir.path());
        fs::create_dir_all(&paths.etc_dir).unwrap();
        fs::write(paths.server_conf(), SHIPPED_CONF).unwrap();

        let env = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = SetupConfig::resolve(env, paths).unwrap();
        (dir, config)
    }

    fn active_lines(config: &SetupConfig) -> Vec<String> {
        fs::read_to_string(config.paths.server_conf())
            .unwrap()
            .lines()
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn generates_expected_active_directives() {
        let (_dir, config) = setup(&[
            ("MYSQL_USER", "zbx"),
            ("MYSQL_PASSWORD", "p&ss/word"),
            ("MYSQL_ROOT_PASSWORD", "root"),
            ("DB_SERVER_HOST", "db.internal"),
            ("ZBX_STARTPOLLERS", "12"),
            ("ZBX_LOADMODULE", "\"dummy.so,other.so\""),
            ("ZBX_TLSCAFILE", "ca.crt"),
            ("ZBX_ENABLE_SNMP_TRAPS", "true"),
        ]);
        let mutator = ConfigMutator::new(Box::new(NativeEditor), config.paths.secrets_dir());

        update_server_config(&mutator, &config).await;

        let home = config.paths.user_home.display().to_string();
        let active = active_lines(&config);
        let expected = [
            "LogType=console".to_string(),
            "DBHost=db.internal".to_string(),
            "DBName=zabbix".to_string(),
            "DBUser=zbx".to_string(),
            "DBPassword=p&ss/word".to_string(),
            "DBPort=3306".to_string(),
            "StartPollers=12".to_string(),
            "JavaGateway=127.0.0.1".to_string(),
            "StartJavaPollers=5".to_string(),
            format!("LoadModulePath={home}/modules/"),
            "LoadModule=dummy.so".to_string(),
            "LoadModule=other.so".to_string(),
            format!("TLSCAFile={home}/enc/ca.crt"),
            format!("SNMPTrapperFile={home}/snmptraps/snmptraps.log"),
            "StartSNMPTrapper=1".to_string(),
        ];
        for line in &expected {
            assert!(active.contains(line), "missing {line:?} in {active:#?}");
        }
        assert!(!active.iter().any(|l| l.starts_with("LogFile=")));
        assert!(!active.iter().any(|l| l.starts_with("ListenPort=")));
        assert!(!active.iter().any(|l| l.starts_with("DBSchema=")));
    }

    #[tokio::test]
    async fn regenerating_is_stable() {
        let (_dir, config) = setup(&[("MYSQL_ROOT_PASSWORD", "root"), ("ZBX_LOADMODULE", "a.so")]);
        let mutator = ConfigMutator::new(Box::new(NativeEditor), config.paths.secrets_dir());

        update_server_config(&mutator, &config).await;
        let first = fs::read_to_string(config.paths.server_conf()).unwrap();
        update_server_config(&mutator, &config).await;
        assert_eq!(fs::read_to_string(config.paths.server_conf()).unwrap(), first);
    }

    #[tokio::test]
    async fn missing_server_config_is_skipped() {
        let (_dir, config) = setup(&[("MYSQL_ROOT_PASSWORD", "root")]);
        fs::remove_file(config.paths.server_conf()).unwrap();
        let mutator = ConfigMutator::new(Box::new(NativeEditor), config.paths.secrets_dir());

        let outcomes = update_server_config(&mutator, &config).await;
        assert!(outcomes.iter().all(|(_, o)| *o == Outcome::SkippedMissingFile));
        assert!(!config.paths.server_conf().exists());
    }
}
