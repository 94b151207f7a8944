use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::session::TransferStats;

/// Datagram sent to the status listener.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub connected: bool,
    pub received_bytes: u64,
    pub sent_bytes: u64,
    pub text: String,
}

impl StatusReport {
    pub fn new(connected: bool, received_bytes: u64, sent_bytes: u64) -> Self {
        let text = if connected {
            format!(
                "Connected to controller, received/sent: {}",
                format_volume(received_bytes, sent_bytes)
            )
        } else {
            format!(
                "Not connected, received/sent: {}",
                format_volume(received_bytes, sent_bytes)
            )
        };
        Self {
            msg_type: "status",
            connected,
            received_bytes,
            sent_bytes,
            text,
        }
    }
}

/// `R/S KB`, or `R/S MB` with two decimals once the total passes 2048 KB.
pub fn format_volume(received_bytes: u64, sent_bytes: u64) -> String {
    let received_kb = received_bytes / 1024;
    let sent_kb = sent_bytes / 1024;
    if received_kb + sent_kb > 2048 {
        format!(
            "{:.2}/{:.2}MB",
            received_kb as f64 / 1024.0,
            sent_kb as f64 / 1024.0
        )
    } else {
        format!("{}/{}KB", received_kb, sent_kb)
    }
}

/// Periodically reports transfer volume to the log and, optionally, to a
/// local UDP listener.
pub struct StatusBridge {
    socket: Option<UdpSocket>,
    target_addr: Option<String>,
    interval: Duration,
    stats: Arc<TransferStats>,
    connected: watch::Receiver<bool>,
}

impl StatusBridge {
    pub async fn new(
        interval: Duration,
        notify_addr: Option<&str>,
        stats: Arc<TransferStats>,
        connected: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        let socket = match notify_addr {
            Some(_) => Some(UdpSocket::bind("0.0.0.0:0").await?),
            None => None,
        };
        Ok(Self {
            socket,
            target_addr: notify_addr.map(str::to_string),
            interval,
            stats,
            connected,
        })
    }

    pub fn report(&self) -> StatusReport {
        StatusReport::new(
            *self.connected.borrow(),
            self.stats.received(),
            self.stats.sent(),
        )
    }

    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = self.publish(&self.report()).await {
                log::warn!("Failed to send status report: {}", e);
            }
        }
    }

    /// Last report, sent once the supervisor has finished.
    pub async fn finish(&self) {
        let report = StatusReport::new(false, self.stats.received(), self.stats.sent());
        if let Err(e) = self.publish(&report).await {
            log::warn!("Failed to send final status report: {}", e);
        }
    }

    async fn publish(&self, report: &StatusReport) -> anyhow::Result<()> {
        log::info!("{}", report.text);
        if let (Some(socket), Some(target)) = (&self.socket, &self.target_addr) {
            let msg = serde_json::to_string(report)?;
            socket.send_to(msg.as_bytes(), target).await?;
        }
        Ok(())
    }
}
