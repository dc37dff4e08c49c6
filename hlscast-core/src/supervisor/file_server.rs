//! In-process static file server for the streaming directory.

use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::path::Path;

use async_trait::async_trait;
use axum::Router;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::http::header::CONTENT_TYPE;
use axum::middleware::{self, Next};
use axum::response::Response;
use futures::FutureExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::{ManagedTask, SupervisorError, TaskExit};

/// Content types players expect for HLS files, by extension.
fn hls_content_type(path: &str) -> Option<&'static str> {
    let extension = path.rsplit_once('.')?.1.to_ascii_lowercase();
    match extension.as_str() {
        "m3u8" | "m3u" => Some("application/vnd.apple.mpegurl"),
        "ts" => Some("video/mp2t"),
        _ => None,
    }
}

async fn set_hls_content_type(request: Request, next: Next) -> Response {
    let content_type = hls_content_type(request.uri().path());
    let mut response = next.run(request).await;
    if let Some(content_type) = content_type
        && response.status().is_success()
    {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    response
}

/// Router serving every file under `root` by relative path.
pub fn file_server_router(root: &Path) -> Router {
    Router::new()
        .fallback_service(ServeDir::new(root))
        .layer(middleware::from_fn(set_hls_content_type))
        .layer(TraceLayer::new_for_http())
}

/// Running file server task with its shutdown handle.
#[derive(Debug)]
pub struct FileServerTask {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<io::Result<()>>>,
    exit: Option<TaskExit>,
}

impl FileServerTask {
    /// Binds `addr` and starts serving `root` in the background.
    ///
    /// # Errors
    /// - `SupervisorError::AddressInUse` - Another socket owns the port
    /// - `SupervisorError::Bind` - Any other bind failure
    pub async fn bind(addr: SocketAddrV4, root: &Path) -> Result<Self, SupervisorError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| {
            if source.kind() == io::ErrorKind::AddrInUse {
                SupervisorError::AddressInUse { addr: addr.into() }
            } else {
                SupervisorError::Bind {
                    addr: addr.into(),
                    source,
                }
            }
        })?;
        let local_addr = listener.local_addr().map_err(|source| SupervisorError::Bind {
            addr: addr.into(),
            source,
        })?;

        let app = file_server_router(root);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        tracing::debug!("File server bound to {}", local_addr);
        Ok(Self {
            local_addr,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
            exit: None,
        })
    }

    /// Address actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn record(&mut self, joined: Result<io::Result<()>, tokio::task::JoinError>) -> TaskExit {
        let exit = match joined {
            Ok(Ok(())) => TaskExit::success(),
            Ok(Err(e)) => {
                tracing::warn!("File server stopped with an error: {}", e);
                TaskExit { code: Some(1) }
            }
            Err(e) => {
                tracing::warn!("File server task aborted: {}", e);
                TaskExit { code: None }
            }
        };
        self.handle = None;
        self.exit = Some(exit);
        exit
    }
}

impl Drop for FileServerTask {
    // A server dropped mid-startup must not outlive its handle
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl ManagedTask for FileServerTask {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn try_exit(&mut self) -> io::Result<Option<TaskExit>> {
        if let Some(exit) = self.exit {
            return Ok(Some(exit));
        }
        let Some(handle) = self.handle.as_mut() else {
            return Ok(None);
        };
        if !handle.is_finished() {
            return Ok(None);
        }
        let joined = handle.now_or_never();
        Ok(joined.map(|joined| self.record(joined)))
    }

    fn signal_terminate(&mut self) -> io::Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            // The receiver is gone only if the server already stopped
            let _ = shutdown.send(());
        }
        Ok(())
    }

    async fn wait(&mut self) -> io::Result<TaskExit> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }
        match self.handle.as_mut() {
            Some(handle) => {
                let joined = handle.await;
                Ok(self.record(joined))
            }
            None => Ok(TaskExit::success()),
        }
    }
}
