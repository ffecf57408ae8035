// 🛡️ Every external side effect (files, processes, database) lives under sys.

pub mod traits;       // Collaborator contracts (database, web server)
pub mod secrets;      // Environment snapshot & VAR / VAR_FILE resolution
pub mod escape;       // sed-safe value escaping
pub mod files;        // Atomic rewrites & token rendering
pub mod directive;    // Idempotent key=value mutator
pub mod database;     // mysql / mysqladmin client
pub mod readiness;    // Database readiness gate
pub mod provision;    // User, database & schema provisioning
pub mod local_db;     // Bundled MariaDB lifecycle
pub mod server_conf;  // zabbix_server.conf directive table
pub mod frontend;     // PHP overrides & zabbix.conf.php
pub mod gateway;      // Java gateway logging & settings
pub mod web;          // Apache / Nginx virtual hosts
