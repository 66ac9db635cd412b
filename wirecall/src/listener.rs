use std::net::SocketAddr;

use tokio::net::TcpStream;

use crate::{Error, ErrorKind, Result, TaskSupervisor};

/// TCP accept loops, one per bound address.
pub struct Listener {
    task_supervisor: TaskSupervisor,
}

impl Default for Listener {
    fn default() -> Self {
        Self::new()
    }
}

impl Listener {
    #[must_use]
    pub fn new() -> Self {
        Self {
            task_supervisor: TaskSupervisor::create(),
        }
    }

    /// Binds `addr` and hands every accepted stream to `on_accept`.
    ///
    /// Returns the bound address, which differs from `addr` for port 0.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::TcpBindFailed`] when the address is taken.
    pub async fn start_listen<F>(&self, addr: SocketAddr, on_accept: F) -> Result<SocketAddr>
    where
        F: Fn(TcpStream, SocketAddr) + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::new(ErrorKind::TcpBindFailed, format!("{addr}: {e}")))?;
        let listener_addr = listener
            .local_addr()
            .map_err(|e| Error::new(ErrorKind::TcpBindFailed, e.to_string()))?;

        self.task_supervisor
            .spawn(format!("accept loop on {listener_addr}"), async move {
                tracing::info!("start listening: {listener_addr}");
                loop {
                    match listener.accept().await {
                        Ok((stream, peer)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                tracing::debug!("set nodelay for {peer} failed: {e}");
                            }
                            tracing::debug!("accept connection from {peer}");
                            on_accept(stream, peer);
                        }
                        Err(e) => {
                            return Err(Error::new(ErrorKind::TcpRecvMsgFailed, e.to_string()));
                        }
                    }
                }
            });

        Ok(listener_addr)
    }

    pub fn stop(&self) {
        self.task_supervisor.stop();
    }

    pub async fn join(&self) {
        self.task_supervisor.all_stopped().await;
    }
}
