use std::sync::Arc;

use fay_connector_rs::audio::{CaptureDevice, LoggingRoute, PlaybackDevice};
use fay_connector_rs::clip_store::FsClipStore;
use fay_connector_rs::config::Config;
use fay_connector_rs::net_link::NetLink;
use fay_connector_rs::status_bridge::StatusBridge;
use tokio::signal;
use tokio::sync::{Mutex, watch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置，第一个参数可覆盖控制器地址
    let mut config = Config::new().map_err(anyhow::Error::msg)?;
    if let Some(addr) = std::env::args().nth(1) {
        config
            .apply_address_override(&addr)
            .map_err(anyhow::Error::msg)?;
    }
    log::info!(
        "{} {} starting, controller {}",
        env!("APP_NAME"),
        env!("APP_VERSION"),
        config.controller_addr()
    );

    let (capture, player) = open_audio(&config)?;
    let store = Arc::new(FsClipStore::new(config.clip_dir.clone()));
    log::info!("Clips are stored in {}", store.dir().display());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let net_link = NetLink::new(
        config.clone(),
        capture,
        Arc::new(Mutex::new(player)),
        Arc::new(LoggingRoute::new()),
        store,
        shutdown_rx,
    );

    let status = Arc::new(
        StatusBridge::new(
            config.status_interval,
            config.status_notify_addr.as_deref(),
            net_link.stats(),
            net_link.subscribe_connected(),
        )
        .await?,
    );
    let status_task = {
        let status = status.clone();
        tokio::spawn(async move { status.run().await })
    };

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Ctrl+C received, shutting down");
                shutdown_tx.send_replace(true);
            }
            Err(e) => log::error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let result = net_link.run().await;
    status_task.abort();
    status.finish().await;

    match result {
        Ok(()) => {
            log::info!("Connector stopped");
            Ok(())
        }
        Err(e) => {
            log::error!("Connector stopped: {}", e);
            Err(e.into())
        }
    }
}

#[cfg(not(feature = "alsa"))]
fn open_audio(
    config: &Config,
) -> anyhow::Result<(Box<dyn CaptureDevice>, Box<dyn PlaybackDevice>)> {
    use fay_connector_rs::audio::{CommandPlayer, ReaderCapture};

    log::info!(
        "Reading S16LE PCM ({} Hz, {} ch) from stdin, playing clips with '{}'",
        config.sample_rate,
        config.channels,
        config.player_command
    );
    Ok((
        Box::new(ReaderCapture::new(std::io::stdin())),
        Box::new(CommandPlayer::new(config.player_command)?),
    ))
}

#[cfg(feature = "alsa")]
fn open_audio(
    config: &Config,
) -> anyhow::Result<(Box<dyn CaptureDevice>, Box<dyn PlaybackDevice>)> {
    use fay_connector_rs::audio::{AlsaCapture, AlsaPlayer};

    Ok((
        Box::new(AlsaCapture::open(
            config.capture_device,
            config.sample_rate,
            config.channels,
        )?),
        Box::new(AlsaPlayer::new(config.playback_device)),
    ))
}
