//! TCP listener: accept loop, connection limits, security gate, session
//! spawn.

use std::{
    net::IpAddr,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use dashmap::DashMap;
use golubsmtpd_common::Signal;
use golubsmtpd_smtp::{Session, SessionContext};
use tokio::{net::TcpListener, sync::broadcast, task::JoinSet};
use tracing::{debug, info, warn};

use crate::gate::ConnectionGate;

#[derive(Debug)]
pub struct Server {
    context: Arc<SessionContext>,
    gate: Arc<dyn ConnectionGate>,
    shutdown: broadcast::Sender<Signal>,

    total_connections: AtomicI64,
    ip_connections: DashMap<IpAddr, i64>,
}

impl Server {
    pub fn new(
        context: Arc<SessionContext>,
        gate: Arc<dyn ConnectionGate>,
        shutdown: broadcast::Sender<Signal>,
    ) -> Self {
        Self {
            context,
            gate,
            shutdown,
            total_connections: AtomicI64::new(0),
            ip_connections: DashMap::new(),
        }
    }

    /// Accept connections until shutdown, then drain running sessions.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        let address = listener.local_addr()?;
        info!(%address, "SMTP server started");

        let mut shutdown = self.shutdown.subscribe();
        let mut sessions: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("listener received shutdown signal, finishing sessions");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!(%err, "failed to accept connection");
                            continue;
                        }
                    };

                    let client_ip = peer.ip();
                    if !self.can_accept(client_ip) {
                        drop(stream);
                        continue;
                    }
                    self.track(client_ip);

                    let server = Arc::clone(&self);
                    let session_shutdown = self.shutdown.subscribe();
                    sessions.spawn(async move {
                        server.run_session(stream, client_ip, session_shutdown).await;
                        server.untrack(client_ip);
                    });
                }
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }

        while sessions.join_next().await.is_some() {}
        info!("SMTP server stopped");
        Ok(())
    }

    async fn run_session(
        &self,
        stream: tokio::net::TcpStream,
        client_ip: IpAddr,
        shutdown: broadcast::Receiver<Signal>,
    ) {
        info!(%client_ip, "new connection accepted");

        if !self.gate.check(client_ip).await {
            warn!(%client_ip, "connection rejected by security checks");
            return;
        }

        let session = Session::new(stream, client_ip.to_string(), Arc::clone(&self.context));
        match session.serve(shutdown).await {
            Ok(()) => debug!(%client_ip, "session completed"),
            Err(err) => debug!(%client_ip, %err, "session ended with error"),
        }
    }

    fn can_accept(&self, client_ip: IpAddr) -> bool {
        let server = &self.context.config.server;

        let total = self.total_connections.load(Ordering::Acquire);
        if total >= server.max_connections as i64 {
            warn!(
                current = total,
                max = server.max_connections,
                "connection rejected: max connections reached"
            );
            return false;
        }

        let per_ip = self.ip_connections.get(&client_ip).map_or(0, |count| *count);
        if per_ip >= server.max_connections_per_ip as i64 {
            warn!(
                %client_ip,
                current = per_ip,
                max = server.max_connections_per_ip,
                "connection rejected: max connections per IP reached"
            );
            return false;
        }

        true
    }

    fn track(&self, client_ip: IpAddr) {
        self.total_connections.fetch_add(1, Ordering::AcqRel);
        *self.ip_connections.entry(client_ip).or_insert(0) += 1;
    }

    fn untrack(&self, client_ip: IpAddr) {
        self.total_connections.fetch_sub(1, Ordering::AcqRel);
        if let Some(mut entry) = self.ip_connections.get_mut(&client_ip) {
            *entry -= 1;
            let drained = *entry <= 0;
            drop(entry);
            if drained {
                // Keyed by IP, so the map shrinks back as clients leave.
                self.ip_connections.remove_if(&client_ip, |_, count| *count <= 0);
            }
        }
    }
}
