// src/config.rs

use std::path::{Path, PathBuf};
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};

use crate::error::{SetupError, SetupResult};
use crate::sys::secrets::Environment;

// ==============================================================================
// 1. Deployment Shape
// ==============================================================================

/// Which image flavour this entrypoint is preparing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deployment {
    /// Server, web interface, Java gateway and (optionally local) database.
    Appliance,
    /// Web interface only, talking to an external server and database.
    Web,
}

impl FromStr for Deployment {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "appliance" => Ok(Self::Appliance),
            "web" => Ok(Self::Web),
            other => Err(SetupError::InvalidValue {
                key: "ZBX_TYPE",
                message: format!("expected 'appliance' or 'web', got '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebServerKind {
    Apache,
    Nginx,
}

impl FromStr for WebServerKind {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "apache" => Ok(Self::Apache),
            "nginx" => Ok(Self::Nginx),
            other => Err(SetupError::InvalidValue {
                key: "ZBX_WEB_SERVER",
                message: format!("expected 'apache' or 'nginx', got '{other}'"),
            }),
        }
    }
}

/// Line-editing backend used by the config mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorKind {
    Native,
    Sed,
}

impl FromStr for EditorKind {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "sed" => Ok(Self::Sed),
            other => Err(SetupError::InvalidValue {
                key: "CONFIG_EDITOR",
                message: format!("expected 'native' or 'sed', got '{other}'"),
            }),
        }
    }
}

// ==============================================================================
// 2. Filesystem Layout
// ==============================================================================

/// Every path the orchestrator touches. `Paths::under` re-roots the whole
/// layout, which is how tests run against a temp directory.
#[derive(Clone, Debug)]
pub struct Paths {
    pub etc_dir: PathBuf,
    pub user_home: PathBuf,
    pub schema_dump: PathBuf,
    pub mysql_conf: PathBuf,
    pub mysql_data_dir: PathBuf,
    pub mysql_run_dir: PathBuf,
    pub php_ini: PathBuf,
    pub apache_sites_dir: PathBuf,
    pub apache_ssl_dir: PathBuf,
    pub nginx_confd_dir: PathBuf,
    pub nginx_ssl_dir: PathBuf,
    pub java_gateway_dir: PathBuf,
    pub supervisor_bin: PathBuf,
    pub supervisor_conf: PathBuf,
}

impl Paths {
    pub fn under(root: &Path) -> Self {
        let at = |p: &str| root.join(p);
        Self {
            etc_dir: at("etc/zabbix"),
            user_home: at("var/lib/zabbix"),
            schema_dump: at("usr/share/doc/zabbix-server-mysql/create.sql.gz"),
            mysql_conf: at("etc/my.cnf.d/mariadb-server.cnf"),
            mysql_data_dir: at("var/lib/mysql"),
            mysql_run_dir: at("var/run/mysqld"),
            php_ini: at("etc/php7/conf.d/99-zabbix.ini"),
            apache_sites_dir: at("etc/apache2/conf.d"),
            apache_ssl_dir: at("etc/ssl/apache2"),
            nginx_confd_dir: at("etc/nginx/conf.d"),
            nginx_ssl_dir: at("etc/ssl/nginx"),
            java_gateway_dir: at("usr/sbin/zabbix_java"),
            supervisor_bin: at("usr/bin/supervisord"),
            supervisor_conf: at("etc/supervisor/supervisord.conf"),
        }
    }

    pub fn server_conf(&self) -> PathBuf {
        self.etc_dir.join("zabbix_server.conf")
    }

    /// TLS material referenced by `TLS*File` directives lives here.
    pub fn secrets_dir(&self) -> PathBuf {
        self.user_home.join("enc")
    }

    pub fn web_conf(&self) -> PathBuf {
        self.etc_dir.join("web").join("zabbix.conf.php")
    }

    pub fn java_logback(&self) -> PathBuf {
        self.etc_dir.join("zabbix_java_gateway_logback.xml")
    }

    pub fn java_settings(&self) -> PathBuf {
        self.java_gateway_dir.join("settings.sh")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::under(Path::new("/"))
    }
}

// ==============================================================================
// 3. Database Target
// ==============================================================================

/// Where the database is and who we are when talking to it. Built once,
/// then read-only.
#[derive(Clone, Debug)]
pub struct DatabaseTarget {
    pub host: String,
    pub port: u16,
    /// Account used for probing and provisioning (root when available).
    pub root_user: String,
    pub root_password: SecretString,
    /// Account the monitoring daemons and frontend log in with.
    pub app_user: String,
    pub app_password: SecretString,
    pub database: String,
    pub use_root_user: bool,
    /// Both a root-capable credential and a dedicated app user were given.
    pub create_app_user: bool,
}

impl DatabaseTarget {
    pub fn resolve(env: &mut Environment, default_host: &str) -> SetupResult<Self> {
        let host = env.get_or("DB_SERVER_HOST", default_host);
        let port = parse_port(&env.get_or("DB_SERVER_PORT", "3306"))?;

        let user = env.resolve("MYSQL_USER", "")?;
        let password = env.resolve_secret("MYSQL_PASSWORD", "")?;
        let root_password = env.resolve_secret("MYSQL_ROOT_PASSWORD", "")?;
        let allow_empty = env.flag("MYSQL_ALLOW_EMPTY_PASSWORD");
        let has_root_password = !root_password.expose_secret().is_empty();

        if user.is_empty() && env.flag("MYSQL_RANDOM_ROOT_PASSWORD") {
            return Err(SetupError::CredentialPolicy(
                "unknown Zabbix user and random 'root' password",
            ));
        }
        if user.is_empty() && !has_root_password && !allow_empty {
            return Err(SetupError::CredentialPolicy(
                "'root' password is not defined and it is not empty",
            ));
        }

        let use_root_user = allow_empty || has_root_password;
        let (root_user, root_password) = if use_root_user {
            ("root".to_string(), root_password)
        } else {
            (user.clone(), password.clone())
        };
        let create_app_user = use_root_user && !user.is_empty();

        let app_user = if user.is_empty() { "zabbix".to_string() } else { user };
        let app_password = if password.expose_secret().is_empty() {
            SecretString::new("zabbix".to_string())
        } else {
            password
        };

        Ok(Self {
            host,
            port,
            root_user,
            root_password,
            app_user,
            app_password,
            database: env.get_or("MYSQL_DATABASE", "zabbix"),
            use_root_user,
            create_app_user,
        })
    }

    pub fn is_local(&self) -> bool {
        self.host == "localhost"
    }
}

fn parse_port(raw: &str) -> SetupResult<u16> {
    raw.parse::<u16>().map_err(|e| SetupError::InvalidValue {
        key: "DB_SERVER_PORT",
        message: format!("must be a TCP port number: {e}"),
    })
}

// ==============================================================================
// 4. Setup Configuration
// ==============================================================================

/// Everything the pipeline needs, resolved once from the environment snapshot
/// and handed to every step by reference.
#[derive(Clone, Debug)]
pub struct SetupConfig {
    pub deployment: Deployment,
    pub web_server: WebServerKind,
    pub editor: EditorKind,
    pub debug_mode: bool,
    /// `None` waits for the database forever.
    pub wait_retries: Option<u32>,
    pub db: DatabaseTarget,
    pub paths: Paths,
    /// Resolved environment; becomes the handoff process environment.
    pub env: Environment,
}

impl SetupConfig {
    pub fn resolve(mut env: Environment, paths: Paths) -> SetupResult<Self> {
        let deployment: Deployment = env.get_or("ZBX_TYPE", "appliance").parse()?;
        let web_server: WebServerKind = env.get_or("ZBX_WEB_SERVER", "apache").parse()?;
        let editor: EditorKind = env.get_or("CONFIG_EDITOR", "native").parse()?;

        let default_host = match deployment {
            Deployment::Appliance => "localhost",
            Deployment::Web => "mysql-server",
        };
        // A freshly initialised bundled database has a password-less root.
        if deployment == Deployment::Appliance
            && env.get_or("DB_SERVER_HOST", default_host) == "localhost"
            && env.get("MYSQL_ALLOW_EMPTY_PASSWORD").is_none()
        {
            env.set("MYSQL_ALLOW_EMPTY_PASSWORD", "true");
        }

        let wait_retries = env
            .get("DB_SERVER_WAIT_RETRIES")
            .map(|raw| {
                raw.parse::<u32>().map_err(|e| SetupError::InvalidValue {
                    key: "DB_SERVER_WAIT_RETRIES",
                    message: format!("must be a positive integer: {e}"),
                })
            })
            .transpose()?
            .filter(|n| *n > 0);

        let db = DatabaseTarget::resolve(&mut env, default_host)?;

        Ok(Self {
            deployment,
            web_server,
            editor,
            debug_mode: env.flag("DEBUG_MODE"),
            wait_retries,
            db,
            paths,
            env,
        })
    }

    /// Where the frontend finds the monitoring server.
    pub fn server_host(&self) -> String {
        let default = match self.deployment {
            Deployment::Appliance => "localhost",
            Deployment::Web => "zabbix-server",
        };
        self.env.get_or("ZBX_SERVER_HOST", default)
    }
}
