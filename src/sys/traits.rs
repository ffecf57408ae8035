// src/sys/traits.rs
//
// Contracts for the external collaborators the orchestrator drives. The
// real implementations shell out to the database and web-server tooling;
// tests swap in in-memory fakes.

use async_trait::async_trait;
use std::path::Path;

// ==============================================================================
// 1. Database Access
// ==============================================================================

#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Lightweight liveness probe. `true` once the server answers.
    async fn ping(&self) -> bool;

    /// Runs one statement with the root-capable credentials and returns the
    /// trimmed output without column names. Empty output means "no rows".
    async fn query(&self, sql: &str) -> Result<String, String>;

    /// Streams a gzip-compressed SQL dump into `database`.
    async fn load_dump(&self, database: &str, dump: &Path) -> Result<(), String>;
}

// ==============================================================================
// 2. Web Server Virtual Hosts
// ==============================================================================

/// Which virtual hosts ended up enabled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VhostReport {
    pub http: bool,
    pub https: bool,
}

#[async_trait]
pub trait WebServer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Links the shipped vhost definitions into the server's include
    /// directory. Missing templates or TLS material only disable the
    /// affected vhost.
    async fn enable_vhosts(&self) -> VhostReport;
}
