//! UDP control and status protocol.
//!
//! Plain ASCII, space-delimited datagrams on a fixed port, used for
//! discovery and remote run control. This sits outside the event data
//! path; it only serializes scalar state:
//!
//! - `ping` answers `pong` (peer discovery).
//! - `QUERY update` answers a series of `POST update <field> <value>`
//!   datagrams carrying the latest status snapshot.
//! - `POST start` / `POST stop` forward run-control requests to the
//!   owner of the command channel.
//!
//! The service reads status from the scheduler's watch channel, so it
//! always reports the most recent coalesced snapshot without touching
//! scheduler state.

use crate::error::AppResult;
use crate::run::RunStatus;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Default port of the control/status service.
pub const DEFAULT_CONTROL_PORT: u16 = 40001;

/// Remote run-control request forwarded to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCommand {
    Start,
    Stop,
}

/// The UDP control endpoint.
pub struct ControlService {
    socket: UdpSocket,
    status_rx: watch::Receiver<RunStatus>,
    commands: mpsc::Sender<RunCommand>,
}

impl ControlService {
    /// Bind the service. Port 0 picks an ephemeral port.
    pub async fn bind(
        port: u16,
        status_rx: watch::Receiver<RunStatus>,
        commands: mpsc::Sender<RunCommand>,
    ) -> AppResult<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        Ok(Self {
            socket,
            status_rx,
            commands,
        })
    }

    /// The bound port.
    pub fn local_port(&self) -> AppResult<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Serve datagrams until the task is dropped.
    pub async fn serve(self) -> AppResult<()> {
        let mut buf = [0u8; 1500];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            let text = String::from_utf8_lossy(&buf[..len]).into_owned();
            self.handle(text.trim(), peer).await;
        }
    }

    async fn handle(&self, text: &str, peer: SocketAddr) {
        let mut tokens = text.split_whitespace();
        match tokens.next() {
            Some("ping") => {
                let _ = self.socket.send_to(b"pong", peer).await;
            }
            Some("pong") => {
                info!(%peer, "discovered peer");
            }
            Some("QUERY") => match tokens.next() {
                Some("update") => self.post_update(peer).await,
                other => debug!(?other, %peer, "unhandled query"),
            },
            Some("POST") => match tokens.next() {
                Some("start") => self.forward(RunCommand::Start).await,
                Some("stop") => self.forward(RunCommand::Stop).await,
                other => debug!(?other, %peer, "unhandled post"),
            },
            _ => debug!(%peer, "unhandled datagram"),
        }
    }

    async fn forward(&self, command: RunCommand) {
        if self.commands.send(command).await.is_err() {
            warn!(?command, "run command dropped, no receiver");
        }
    }

    /// Send the latest status snapshot as one `POST update` datagram per
    /// field.
    async fn post_update(&self, peer: SocketAddr) {
        let status = self.status_rx.borrow().clone();
        let started = status
            .started
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        let stopped = status
            .stopped
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());

        let fields = [
            format!("POST update state {}", status.state.as_str()),
            format!("POST update runname \"{}\"", status.run_name),
            format!("POST update start {started}"),
            format!("POST update stop {stopped}"),
            format!("POST update numberofevents {}", status.events),
            format!("POST update eventrate {:.1}", status.event_rate),
        ];
        for field in fields {
            if let Err(e) = self.socket.send_to(field.as_bytes(), peer).await {
                debug!(%peer, error = %e, "status datagram not sent");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::RunState;
    use std::time::Duration;

    async fn start_service(
        status: RunStatus,
    ) -> (u16, mpsc::Receiver<RunCommand>, watch::Sender<RunStatus>) {
        let (status_tx, status_rx) = watch::channel(status);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let service = ControlService::bind(0, status_rx, cmd_tx).await.unwrap();
        let port = service.local_port().unwrap();
        tokio::spawn(service.serve());
        (port, cmd_rx, status_tx)
    }

    async fn client() -> UdpSocket {
        UdpSocket::bind(("127.0.0.1", 0)).await.unwrap()
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let (port, _cmd_rx, _status_tx) = start_service(RunStatus::default()).await;
        let client = client().await;
        client.send_to(b"ping", ("127.0.0.1", port)).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"pong");
    }

    #[tokio::test]
    async fn query_update_posts_status_fields() {
        let status = RunStatus {
            state: RunState::Running,
            run_name: "beamtime".into(),
            events: 12,
            ..RunStatus::default()
        };
        let (port, _cmd_rx, _status_tx) = start_service(status).await;
        let client = client().await;
        client
            .send_to(b"QUERY update", ("127.0.0.1", port))
            .await
            .unwrap();

        let mut lines = Vec::new();
        let mut buf = [0u8; 256];
        for _ in 0..6 {
            let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            lines.push(String::from_utf8_lossy(&buf[..len]).into_owned());
        }

        assert!(lines.iter().all(|l| l.starts_with("POST update ")));
        assert!(lines.contains(&"POST update state running".to_string()));
        assert!(lines.contains(&"POST update runname \"beamtime\"".to_string()));
        assert!(lines.contains(&"POST update numberofevents 12".to_string()));
    }

    #[tokio::test]
    async fn post_start_and_stop_forward_commands() {
        let (port, mut cmd_rx, _status_tx) = start_service(RunStatus::default()).await;
        let client = client().await;
        client
            .send_to(b"POST start", ("127.0.0.1", port))
            .await
            .unwrap();
        client
            .send_to(b"POST stop", ("127.0.0.1", port))
            .await
            .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), cmd_rx.recv())
            .await
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), cmd_rx.recv())
            .await
            .unwrap();
        assert_eq!(first, Some(RunCommand::Start));
        assert_eq!(second, Some(RunCommand::Stop));
    }
}
