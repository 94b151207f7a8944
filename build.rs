use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    controller: Controller,
    capture: Capture,
    playback: Playback,
    frame: Frame,
    status: Status,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Controller {
    host: String,
    port: u16,
    connect_timeout_secs: u64,
    reconnect: bool,
    max_retry_delay_secs: u64,
}

#[derive(Deserialize)]
struct Capture {
    device: String,
    sample_rate: u32,
    channels: u32,
    chunk_bytes: usize,
    restart_cooldown_secs: u64,
    max_restarts: u32,
}

#[derive(Deserialize)]
struct Playback {
    device: String,
    clip_dir: String,
    player_command: String,
    settle_delay_ms: u64,
}

#[derive(Deserialize)]
struct Frame {
    read_chunk_bytes: usize,
    max_payload_bytes: usize,
}

#[derive(Deserialize)]
struct Status {
    interval_secs: u64,
    notify_addr: String,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 应用信息
    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 控制器连接
    println!("cargo:rustc-env=CONTROLLER_HOST={}", config.controller.host);
    println!("cargo:rustc-env=CONTROLLER_PORT={}", config.controller.port);
    println!("cargo:rustc-env=CONNECT_TIMEOUT_SECS={}", config.controller.connect_timeout_secs);
    println!("cargo:rustc-env=RECONNECT={}", config.controller.reconnect);
    println!("cargo:rustc-env=MAX_RETRY_DELAY_SECS={}", config.controller.max_retry_delay_secs);

    // 采集配置
    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.capture.device);
    println!("cargo:rustc-env=CAPTURE_SAMPLE_RATE={}", config.capture.sample_rate);
    println!("cargo:rustc-env=CAPTURE_CHANNELS={}", config.capture.channels);
    println!("cargo:rustc-env=CAPTURE_CHUNK_BYTES={}", config.capture.chunk_bytes);
    println!(
        "cargo:rustc-env=CAPTURE_RESTART_COOLDOWN_SECS={}",
        config.capture.restart_cooldown_secs
    );
    println!("cargo:rustc-env=CAPTURE_MAX_RESTARTS={}", config.capture.max_restarts);

    // 播放配置
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.playback.device);
    println!("cargo:rustc-env=CLIP_DIR={}", config.playback.clip_dir);
    println!("cargo:rustc-env=PLAYER_COMMAND={}", config.playback.player_command);
    println!("cargo:rustc-env=SETTLE_DELAY_MS={}", config.playback.settle_delay_ms);

    // 帧接收
    println!("cargo:rustc-env=FRAME_READ_CHUNK_BYTES={}", config.frame.read_chunk_bytes);
    println!("cargo:rustc-env=FRAME_MAX_PAYLOAD_BYTES={}", config.frame.max_payload_bytes);

    // 状态通知
    println!("cargo:rustc-env=STATUS_INTERVAL_SECS={}", config.status.interval_secs);
    println!("cargo:rustc-env=STATUS_NOTIFY_ADDR={}", config.status.notify_addr);
}
