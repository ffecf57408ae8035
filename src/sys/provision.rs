// src/sys/provision.rs

use std::path::Path;

use secrecy::ExposeSecret;
use tracing::{info, warn};

use crate::config::DatabaseTarget;
use crate::error::{SetupError, SetupResult};
use crate::sys::traits::DatabaseClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStep {
    /// No root-capable credential or no dedicated app user configured.
    Skipped,
    Created,
    PasswordReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseStep {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStep {
    Loaded,
    /// `dbversion.mandatory` of the schema already in place.
    AlreadyAtVersion(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub user: UserStep,
    pub database: DatabaseStep,
    pub schema: SchemaStep,
}

/// `'value'` with backslashes and quotes escaped for a MySQL string literal.
fn sql_literal(raw: &str) -> String {
    format!("'{}'", raw.replace('\\', "\\\\").replace('\'', "''"))
}

/// Backtick-quoted identifier.
fn sql_ident(raw: &str) -> String {
    format!("`{}`", raw.replace('`', "``"))
}

/// Idempotent user / database / base-schema provisioning.
///
/// Every step checks before it mutates, so running on every container start
/// is safe. The only change to existing state is resetting the app user's
/// password so a redeploy with a new secret converges.
pub struct Provisioner<'a> {
    db: &'a dyn DatabaseClient,
    target: &'a DatabaseTarget,
    schema_dump: &'a Path,
}

impl<'a> Provisioner<'a> {
    pub fn new(db: &'a dyn DatabaseClient, target: &'a DatabaseTarget, schema_dump: &'a Path) -> Self {
        Self {
            db,
            target,
            schema_dump,
        }
    }

    pub async fn run(&self) -> SetupResult<ProvisionReport> {
        let user = self.ensure_user().await?;
        let database = self.ensure_database().await?;
        let schema = self.ensure_schema().await?;
        Ok(ProvisionReport {
            user,
            database,
            schema,
        })
    }

    async fn query(&self, sql: &str) -> SetupResult<String> {
        self.db
            .query(sql)
            .await
            .map_err(SetupError::command("MySQL query failed"))
    }

    fn account(&self) -> String {
        format!("{}@'%'", sql_literal(&self.target.app_user))
    }

    async fn grant(&self) -> SetupResult<()> {
        self.query(&format!(
            "GRANT ALL PRIVILEGES ON {}.* TO {}",
            sql_ident(&self.target.database),
            self.account()
        ))
        .await
        .map(|_| ())
    }

    async fn ensure_user(&self) -> SetupResult<UserStep> {
        if !self.target.create_app_user {
            return Ok(UserStep::Skipped);
        }

        info!("** Creating '{}' user in MySQL database", self.target.app_user);

        let exists = self
            .query(&format!(
                "SELECT 1 FROM mysql.user WHERE user = {} AND host = '%'",
                sql_literal(&self.target.app_user)
            ))
            .await?;

        let password = sql_literal(self.target.app_password.expose_secret());
        let step = if exists.is_empty() {
            self.query(&format!("CREATE USER {} IDENTIFIED BY {}", self.account(), password))
                .await?;
            UserStep::Created
        } else {
            self.query(&format!("ALTER USER {} IDENTIFIED BY {}", self.account(), password))
                .await?;
            UserStep::PasswordReset
        };

        self.grant().await?;
        Ok(step)
    }

    async fn ensure_database(&self) -> SetupResult<DatabaseStep> {
        let name = &self.target.database;
        let exists = self
            .query(&format!(
                "SELECT SCHEMA_NAME FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = {}",
                sql_literal(name)
            ))
            .await?;

        if !exists.is_empty() {
            warn!(
                "** Database '{}' already exists. Please be careful with database COLLATE!",
                name
            );
            return Ok(DatabaseStep::AlreadyExists);
        }

        info!("** Database '{}' does not exist. Creating...", name);
        self.query(&format!(
            "CREATE DATABASE {} CHARACTER SET utf8 COLLATE utf8_bin",
            sql_ident(name)
        ))
        .await?;
        if self.target.create_app_user {
            self.grant().await?;
        }
        Ok(DatabaseStep::Created)
    }

    async fn ensure_schema(&self) -> SetupResult<SchemaStep> {
        let name = &self.target.database;
        let table = self
            .query(&format!(
                "SELECT 1 FROM information_schema.tables WHERE table_schema = {} AND table_name = 'dbversion'",
                sql_literal(name)
            ))
            .await?;

        let version = if table.is_empty() {
            String::new()
        } else {
            info!("** Table '{}.dbversion' already exists.", name);
            self.query(&format!("SELECT mandatory FROM {}.dbversion", sql_ident(name)))
                .await?
        };

        if !version.is_empty() {
            return Ok(SchemaStep::AlreadyAtVersion(version));
        }

        info!("** Creating '{}' schema in MySQL", name);
        self.db
            .load_dump(name, self.schema_dump)
            .await
            .map_err(SetupError::command("Schema import failed"))?;
        Ok(SchemaStep::Loaded)
    }
}
