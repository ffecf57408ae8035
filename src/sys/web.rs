// src/sys/web.rs

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{info, warn};

use crate::config::Paths;
use crate::sys::traits::{VhostReport, WebServer};

/// Points `link` at `template`. Re-running with the link already in place is
/// a no-op; a stale link or file at `link` is replaced.
async fn link_vhost(template: &Path, link: &Path) -> Result<bool, String> {
    if !fs::try_exists(template).await.unwrap_or(false) {
        warn!("**** Virtual host template '{}' does not exist", template.display());
        return Ok(false);
    }

    if let Ok(current) = fs::read_link(link).await {
        if current == template {
            return Ok(true);
        }
    }
    if fs::symlink_metadata(link).await.is_ok() {
        fs::remove_file(link)
            .await
            .map_err(|e| format!("Failed to remove '{}': {}", link.display(), e))?;
    }

    if let Some(dir) = link.parent() {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| format!("Failed to create '{}': {}", dir.display(), e))?;
    }
    fs::symlink(template, link)
        .await
        .map_err(|e| format!("Failed to link '{}': {}", link.display(), e))?;
    Ok(true)
}

async fn enable(template: PathBuf, link: PathBuf) -> bool {
    match link_vhost(&template, &link).await {
        Ok(enabled) => enabled,
        Err(e) => {
            warn!("**** {}", e);
            false
        }
    }
}

async fn has_tls_material(ssl_dir: &Path) -> bool {
    let crt = fs::try_exists(ssl_dir.join("ssl.crt")).await.unwrap_or(false);
    let key = fs::try_exists(ssl_dir.join("ssl.key")).await.unwrap_or(false);
    crt && key
}

// ==============================================================================
// 1. Apache Implementation
// ==============================================================================

pub struct ApacheSites {
    templates: PathBuf,
    sites_dir: PathBuf,
    ssl_dir: PathBuf,
}

impl ApacheSites {
    pub fn new(paths: &Paths) -> Self {
        Self {
            templates: paths.etc_dir.clone(),
            sites_dir: paths.apache_sites_dir.clone(),
            ssl_dir: paths.apache_ssl_dir.clone(),
        }
    }
}

#[async_trait]
impl WebServer for ApacheSites {
    fn name(&self) -> &'static str {
        "apache"
    }

    async fn enable_vhosts(&self) -> VhostReport {
        info!("** Adding Zabbix virtual host (HTTP)");
        let http = enable(
            self.templates.join("apache.conf"),
            self.sites_dir.join("zabbix.conf"),
        )
        .await;

        let https = if has_tls_material(&self.ssl_dir).await {
            info!("** Adding Zabbix virtual host (HTTPS)");
            enable(
                self.templates.join("apache_ssl.conf"),
                self.sites_dir.join("zabbix_ssl.conf"),
            )
            .await
        } else {
            info!("**** Impossible to enable SSL support for Apache2. Certificates are missed.");
            false
        };

        VhostReport { http, https }
    }
}

// ==============================================================================
// 2. Nginx Implementation
// ==============================================================================

pub struct NginxSites {
    templates: PathBuf,
    confd_dir: PathBuf,
    ssl_dir: PathBuf,
}

impl NginxSites {
    pub fn new(paths: &Paths) -> Self {
        Self {
            templates: paths.etc_dir.clone(),
            confd_dir: paths.nginx_confd_dir.clone(),
            ssl_dir: paths.nginx_ssl_dir.clone(),
        }
    }
}

#[async_trait]
impl WebServer for NginxSites {
    fn name(&self) -> &'static str {
        "nginx"
    }

    async fn enable_vhosts(&self) -> VhostReport {
        // The distribution's catch-all server would shadow ours on port 80.
        let default_site = self.confd_dir.join("default.conf");
        if fs::symlink_metadata(&default_site).await.is_ok() {
            if let Err(e) = fs::remove_file(&default_site).await {
                warn!("**** Failed to remove '{}': {}", default_site.display(), e);
            }
        }

        info!("** Adding Zabbix virtual host (HTTP)");
        let http = enable(
            self.templates.join("nginx.conf"),
            self.confd_dir.join("nginx.conf"),
        )
        .await;

        let https = if has_tls_material(&self.ssl_dir).await {
            info!("** Adding Zabbix virtual host (HTTPS)");
            enable(
                self.templates.join("nginx_ssl.conf"),
                self.confd_dir.join("nginx_ssl.conf"),
            )
            .await
        } else {
            info!("**** Impossible to enable SSL support for Nginx. Certificates are missed.");
            false
        };

        VhostReport { http, https }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as std_fs;
    use tempfile::TempDir;

    fn layout(with_tls: bool) -> (TempDir, Paths) {
        let dir = TempDir::new().unwrap();
        let paths = Paths::under(dir.path());
        std_fs::create_dir_all(&paths.etc_dir).unwrap();
        for template in ["apache.conf", "apache_ssl.conf", "nginx.conf", "nginx_ssl.conf"] {
            std_fs::write(paths.etc_dir.join(template), "# vhost\n").unwrap();
        }
        if with_tls {
            for ssl_dir in [&paths.apache_ssl_dir, &paths.nginx_ssl_dir] {
                std_fs::create_dir_all(ssl_dir).unwrap();
                std_fs::write(ssl_dir.join("ssl.crt"), "crt").unwrap();
                std_fs::write(ssl_dir.join("ssl.key"), "key").unwrap();
            }
        }
        (dir, paths)
    }

    #[tokio::test]
    async fn apache_http_only_without_certificates() {
        let (_dir, paths) = layout(false);
        let report = ApacheSites::new(&paths).enable_vhosts().await;

        assert_eq!(report, VhostReport { http: true, https: false });
        let link = paths.apache_sites_dir.join("zabbix.conf");
        assert_eq!(std_fs::read_link(&link).unwrap(), paths.etc_dir.join("apache.conf"));
        assert!(!paths.apache_sites_dir.join("zabbix_ssl.conf").exists());
    }

    #[tokio::test]
    async fn apache_https_with_certificates_and_rerun_is_stable() {
        let (_dir, paths) = layout(true);
        let sites = ApacheSites::new(&paths);

        let first = sites.enable_vhosts().await;
        let second = sites.enable_vhosts().await;

        assert_eq!(first, VhostReport { http: true, https: true });
        assert_eq!(second, first);
        assert_eq!(
            std_fs::read_link(paths.apache_sites_dir.join("zabbix_ssl.conf")).unwrap(),
            paths.etc_dir.join("apache_ssl.conf")
        );
    }

    #[tokio::test]
    async fn nginx_drops_default_site() {
        let (_dir, paths) = layout(true);
        std_fs::create_dir_all(&paths.nginx_confd_dir).unwrap();
        std_fs::write(paths.nginx_confd_dir.join("default.conf"), "server {}\n").unwrap();

        let report = NginxSites::new(&paths).enable_vhosts().await;

        assert_eq!(report, VhostReport { http: true, https: true });
        assert!(!paths.nginx_confd_dir.join("default.conf").exists());
        assert!(paths.nginx_confd_dir.join("nginx_ssl.conf").exists());
    }

    #[tokio::test]
    async fn missing_template_only_disables_that_vhost() {
        let (_dir, paths) = layout(false);
        std_fs::remove_file(paths.etc_dir.join("nginx.conf")).unwrap();

        let report = NginxSites::new(&paths).enable_vhosts().await;
        assert_eq!(report, VhostReport::default());
    }

    #[tokio::test]
    async fn stale_link_is_replaced() {
        let (dir, paths) = layout(false);
        std_fs::create_dir_all(&paths.apache_sites_dir).unwrap();
        let link = paths.apache_sites_dir.join("zabbix.conf");
        std::os::unix::fs::symlink(dir.path().join("gone.conf"), &link).unwrap();

        assert!(link_vhost(&paths.etc_dir.join("apache.conf"), &link).await.unwrap());
        assert_eq!(std_fs::read_link(&link).unwrap(), paths.etc_dir.join("apache.conf"));
    }
}
