// src/orchestrator.rs

use secrecy::ExposeSecret;
use tokio::fs;
use tracing::{info, warn};

use crate::config::{Deployment, EditorKind, SetupConfig, WebServerKind};
use crate::error::SetupResult;
use crate::sys::database::MysqlCli;
use crate::sys::directive::{ConfigMutator, LineEditor, NativeEditor, SedEditor};
use crate::sys::frontend::{export_maintenance, prepare_frontend};
use crate::sys::gateway::prepare_java_gateway;
use crate::sys::local_db::LocalMysqld;
use crate::sys::provision::{ProvisionReport, Provisioner};
use crate::sys::readiness::ReadinessGate;
use crate::sys::secrets::Environment;
use crate::sys::server_conf::update_server_config;
use crate::sys::traits::{DatabaseClient, VhostReport, WebServer};
use crate::sys::web::{ApacheSites, NginxSites};

/// Directories under the monitoring user's home that directives point into.
const HOME_SUBDIRS: &[&str] = &[
    "enc",
    "modules",
    "snmptraps",
    "ssh_keys",
    "ssl/certs",
    "ssl/keys",
    "ssl/ssl_ca",
];

/// What a successful pipeline leaves behind for the handoff.
#[derive(Debug)]
pub struct Prepared {
    /// Resolved environment the handoff process inherits.
    pub env: Environment,
    pub provision: Option<ProvisionReport>,
    pub vhosts: VhostReport,
}

pub struct Orchestrator {
    config: SetupConfig,
    mutator: ConfigMutator,
    db: Box<dyn DatabaseClient>,
    web: Box<dyn WebServer>,
    gate: ReadinessGate,
}

impl Orchestrator {
    pub fn new(config: SetupConfig) -> Self {
        let db: Box<dyn DatabaseClient> = Box::new(MysqlCli::new(&config.db));
        let web: Box<dyn WebServer> = match config.web_server {
            WebServerKind::Apache => Box::new(ApacheSites::new(&config.paths)),
            WebServerKind::Nginx => Box::new(NginxSites::new(&config.paths)),
        };
        let gate = ReadinessGate::new(config.wait_retries);
        Self::with_components(config, db, web, gate)
    }

    /// Injection point for alternative database or web-server backends.
    pub fn with_components(
        config: SetupConfig,
        db: Box<dyn DatabaseClient>,
        web: Box<dyn WebServer>,
        gate: ReadinessGate,
    ) -> Self {
        let editor: Box<dyn LineEditor> = match config.editor {
            EditorKind::Native => Box::new(NativeEditor),
            EditorKind::Sed => Box::new(SedEditor),
        };
        let mutator = ConfigMutator::new(editor, config.paths.secrets_dir());
        Self {
            config,
            mutator,
            db,
            web,
            gate,
        }
    }

    /// Runs every setup step in order. The first fatal error aborts the
    /// pipeline; a bundled database started along the way is stopped either
    /// way.
    pub async fn run(mut self) -> SetupResult<Prepared> {
        info!("** Deploying Zabbix {:?}", self.config.deployment);

        self.prepare_system().await;

        let local_db = if self.config.deployment == Deployment::Appliance && self.config.db.is_local() {
            Some(LocalMysqld::start(&self.config.paths).await?)
        } else {
            None
        };

        let result = self.prepare().await;

        // clear_deploy
        if let Some(mysqld) = local_db {
            mysqld.stop().await;
        }

        let (provision, vhosts) = result?;
        info!("########################################################");

        Ok(Prepared {
            env: self.config.env,
            provision,
            vhosts,
        })
    }

    async fn prepare(&mut self) -> SetupResult<(Option<ProvisionReport>, VhostReport)> {
        let provision = match self.config.deployment {
            Deployment::Appliance => Some(self.prepare_server().await?),
            Deployment::Web => None,
        };

        let vhosts = self.prepare_web().await?;

        if self.config.deployment == Deployment::Appliance {
            let failures = prepare_java_gateway(&self.mutator, &self.config).await;
            if failures > 0 {
                warn!("**** Java gateway configuration finished with {} failures", failures);
            }
        }

        Ok((provision, vhosts))
    }

    async fn prepare_system(&self) {
        if self.config.deployment != Deployment::Appliance {
            return;
        }
        info!("** Preparing the system");

        let home = &self.config.paths.user_home;
        for sub in HOME_SUBDIRS {
            let dir = home.join(sub);
            if let Err(e) = fs::create_dir_all(&dir).await {
                warn!("**** Failed to create '{}': {}", dir.display(), e);
            }
        }
    }

    fn log_connection_banner(&self) {
        let db = &self.config.db;
        info!("********************");
        info!("* DB_SERVER_HOST: {}", db.host);
        info!("* DB_SERVER_PORT: {}", db.port);
        info!("* DB_SERVER_DBNAME: {}", db.database);
        if self.config.debug_mode {
            if db.use_root_user {
                info!("* DB_SERVER_ROOT_USER: {}", db.root_user);
                info!("* DB_SERVER_ROOT_PASS: {}", db.root_password.expose_secret());
            }
            info!("* DB_SERVER_ZBX_USER: {}", db.app_user);
            info!("* DB_SERVER_ZBX_PASS: {}", db.app_password.expose_secret());
        }
        info!("********************");
    }

    async fn prepare_server(&self) -> SetupResult<ProvisionReport> {
        info!("** Preparing Zabbix server");
        self.log_connection_banner();

        self.gate.await_ready(self.db.as_ref()).await?;

        let report = Provisioner::new(self.db.as_ref(), &self.config.db, &self.config.paths.schema_dump)
            .run()
            .await?;

        update_server_config(&self.mutator, &self.config).await;
        Ok(report)
    }

    async fn prepare_web(&mut self) -> SetupResult<VhostReport> {
        info!("** Preparing Zabbix web-interface");
        if self.config.deployment == Deployment::Web {
            self.log_connection_banner();
        }

        self.gate.await_ready(self.db.as_ref()).await?;

        info!("** Adding Zabbix virtual host ({})", self.web.name());
        let vhosts = self.web.enable_vhosts().await;

        export_maintenance(&mut self.config.env);
        let failures = prepare_frontend(&self.mutator, &self.config).await;
        if failures > 0 {
            warn!("**** Frontend configuration finished with {} failures", failures);
        }
        Ok(vhosts)
    }
}
