//! Application wiring: backend selection, shared state, router, serve loop.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use nasrelay_gateway::{GatewaySettings, TransferGateway};
use nasrelay_storage::{
    MemoryBackend, SftpBackend, SftpConfig, ShareAddress, ShareTreeBackend, StorageBackend,
};
use nasrelay_transfer::StagingArea;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::{Config, StorageConfig, StorageKind};
use crate::routes;

/// State shared by every request. Never mutated after startup.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<TransferGateway>,
    pub max_upload_files: usize,
}

/// Builds the storage backend selected by the configuration.
pub fn build_backend(config: &StorageConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config.kind {
        StorageKind::Sftp => {
            if config.host.is_empty() {
                anyhow::bail!("storage.host is required for the sftp backend");
            }
            Arc::new(SftpBackend::new(SftpConfig {
                host: config.host.clone(),
                port: config.port,
                timeout: Duration::from_secs(config.connect_timeout_secs),
            }))
        }
        StorageKind::Share => {
            let address = ShareAddress::parse(&config.share)?;
            let Some(mount_point) = config.mount_point.clone() else {
                anyhow::bail!("storage.mount_point is required for the share backend");
            };
            tracing::info!(share = %address, mount_point = %mount_point.display(), "using share backend");
            let mut backend = ShareTreeBackend::new(address, mount_point);
            if let Some(table) = &config.mount_table {
                backend = backend.with_mount_table(table);
            }
            Arc::new(backend)
        }
        StorageKind::Memory => {
            tracing::warn!("using in-memory backend; nothing is persisted");
            Arc::new(MemoryBackend::new().with_directory(&config.base_path))
        }
    };
    Ok(backend)
}

/// Builds the HTTP router.
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/upload", post(routes::upload))
        .route("/api/files", get(routes::list_files))
        .route("/api/directories", get(routes::list_directories))
        .route("/api/download/:filename", get(routes::download))
        .route("/api/download-multiple", post(routes::download_multiple))
        .route("/api/delete/:filename", delete(routes::delete_file))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Runs the relay until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let staging = StagingArea::open(&config.server.staging_dir).await?;
    let swept = staging.sweep().await;
    if swept > 0 {
        tracing::info!(count = swept, "removed leftover staged files");
    }

    let backend = build_backend(&config.storage)?;
    let settings = GatewaySettings {
        credentials: (&config.storage.credentials).into(),
        base_path: config.storage.base_path.clone(),
    };
    if config.storage.kind == StorageKind::Share {
        // A share mounted under other credentials is a configuration error.
        let session = backend.open(&settings.credentials).await?;
        session.close().await;
    }
    let gateway = TransferGateway::new(backend, Arc::new(settings), Arc::new(staging));

    let state = AppState {
        gateway: Arc::new(gateway),
        max_upload_files: config.server.max_upload_files,
    };
    let app = router(state, config.server.max_body_bytes);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, base_path = %config.storage.base_path, "relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("SIGINT received, shutting down");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use nasrelay_storage::{Credentials, StorageError};

    use super::*;

    #[test]
    fn sftp_requires_host() {
        let config = StorageConfig {
            kind: StorageKind::Sftp,
            ..StorageConfig::default()
        };
        assert!(build_backend(&config).is_err());
    }

    #[test]
    fn share_requires_valid_address_and_mount() {
        let mut config = StorageConfig {
            kind: StorageKind::Share,
            share: "not-a-share".into(),
            ..StorageConfig::default()
        };
        assert!(build_backend(&config).is_err());

        config.share = "//192.168.8.4/Ocean".into();
        assert!(build_backend(&config).is_err());

        config.mount_point = Some("/mnt/ocean".into());
        let backend = build_backend(&config).unwrap();
        assert_eq!(backend.separator(), '\\');
    }

    #[tokio::test]
    async fn share_checks_configured_mount_table() {
        let tmp = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            kind: StorageKind::Share,
            share: "//192.168.8.4/Ocean".into(),
            mount_point: Some(tmp.path().to_path_buf()),
            mount_table: Some(tmp.path().join("no-such-table")),
            ..StorageConfig::default()
        };
        let backend = build_backend(&config).unwrap();

        let credentials = Credentials {
            username: "relay".into(),
            password: "secret".into(),
            domain: "WORKGROUP".into(),
        };
        assert!(matches!(
            backend.open(&credentials).await,
            Err(StorageError::Connection(_))
        ));
    }

    #[test]
    fn memory_backend_is_available() {
        let config = StorageConfig {
            kind: StorageKind::Memory,
            base_path: "ingest".into(),
            ..StorageConfig::default()
        };
        let backend = build_backend(&config).unwrap();
        assert_eq!(backend.separator(), '/');
    }
}
