//! The acceptor: binds the control port and hands each accepted control
//! connection to its own [`ConnectionHandler`] thread.

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::connection::ConnectionHandler;
use crate::error::{Result, WavecastError};

/// How often the accept loop rechecks the running flag while idle.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Root directory resources are served from and recorded into.
    pub storage_dir: PathBuf,
    /// Connections accepted beyond this count are dropped immediately.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            storage_dir: PathBuf::from("media"),
            max_connections: 16,
        }
    }
}

pub struct Server {
    bind_addr: String,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
    local_addr: Option<std::net::SocketAddr>,
    acceptor: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(bind_addr: &str) -> Self {
        Self::with_config(bind_addr, ServerConfig::default())
    }

    /// Create a server with custom storage and limit configuration.
    pub fn with_config(bind_addr: &str, config: ServerConfig) -> Self {
        Server {
            bind_addr: bind_addr.to_string(),
            config: Arc::new(config),
            running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            acceptor: None,
        }
    }

    /// Bind the control port and start accepting connections on a
    /// background thread.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(WavecastError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let config = self.config.clone();

        let acceptor = thread::Builder::new()
            .name("wavecast-acceptor".to_string())
            .spawn(move || accept_loop(listener, config, running))?;
        self.acceptor = Some(acceptor);

        tracing::info!(addr = %local_addr, storage = %self.config.storage_dir.display(), "server started");
        Ok(())
    }

    /// Signal the accept loop to exit and join it. Connections already in
    /// flight observe the flag on their next request.
    pub fn stop(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(WavecastError::NotStarted);
        }
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
        tracing::info!("server stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The bound control address, once started. Useful when binding to
    /// port 0.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.local_addr
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

fn accept_loop(listener: TcpListener, config: Arc<ServerConfig>, running: Arc<AtomicBool>) {
    let active = Arc::new(AtomicUsize::new(0));

    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if active.load(Ordering::SeqCst) >= config.max_connections {
                    tracing::warn!(%peer_addr, limit = config.max_connections, "connection limit reached, refusing");
                    drop(stream);
                    continue;
                }
                active.fetch_add(1, Ordering::SeqCst);

                let config = config.clone();
                let running = running.clone();
                let active_for_thread = active.clone();
                let spawned = thread::Builder::new()
                    .name("wavecast-conn".to_string())
                    .spawn(move || {
                        ConnectionHandler::handle(stream, config, running);
                        active_for_thread.fetch_sub(1, Ordering::SeqCst);
                    });
                if let Err(e) = spawned {
                    active.fetch_sub(1, Ordering::SeqCst);
                    tracing::error!(%peer_addr, error = %e, "failed to spawn connection thread");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_server() -> Server {
        Server::with_config(
            "127.0.0.1:0",
            ServerConfig {
                storage_dir: std::env::temp_dir(),
                max_connections: 4,
            },
        )
    }

    #[test]
    fn start_twice_is_already_running() {
        let mut server = test_server();
        server.start().unwrap();
        assert!(server.is_running());
        assert!(matches!(
            server.start(),
            Err(WavecastError::AlreadyRunning)
        ));
        server.stop().unwrap();
    }

    #[test]
    fn stop_without_start_is_not_started() {
        let mut server = test_server();
        assert!(matches!(server.stop(), Err(WavecastError::NotStarted)));
    }

    #[test]
    fn bound_address_is_visible_after_start() {
        let mut server = test_server();
        assert!(server.local_addr().is_none());
        server.start().unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        server.stop().unwrap();
        assert!(!server.is_running());
    }
}
