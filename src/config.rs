use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // 控制器连接配置
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub reconnect: bool,
    pub max_retry_delay: Duration,

    // 麦克风采集配置
    pub capture_device: &'static str,
    pub sample_rate: u32,
    pub channels: u32,
    pub chunk_bytes: usize,
    pub capture_restart_cooldown: Duration,
    pub capture_max_restarts: u32,

    // 播放配置
    pub playback_device: &'static str,
    pub clip_dir: PathBuf,
    pub player_command: &'static str,
    pub settle_delay: Duration,

    // 下行帧配置
    pub read_chunk_bytes: usize,
    pub max_payload_bytes: usize,

    // 状态通知
    pub status_interval: Duration,
    pub status_notify_addr: Option<String>,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        let notify_addr = env!("STATUS_NOTIFY_ADDR").trim();

        Ok(Self {
            host: env!("CONTROLLER_HOST").to_string(),
            port: env!("CONTROLLER_PORT").parse()
                .map_err(|_| "Failed to parse CONTROLLER_PORT")?,
            connect_timeout: Duration::from_secs(env!("CONNECT_TIMEOUT_SECS").parse()
                .map_err(|_| "Failed to parse CONNECT_TIMEOUT_SECS")?),
            reconnect: env!("RECONNECT").parse()
                .map_err(|_| "Failed to parse RECONNECT")?,
            max_retry_delay: Duration::from_secs(env!("MAX_RETRY_DELAY_SECS").parse()
                .map_err(|_| "Failed to parse MAX_RETRY_DELAY_SECS")?),

            capture_device: env!("CAPTURE_DEVICE"),
            sample_rate: env!("CAPTURE_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse CAPTURE_SAMPLE_RATE")?,
            channels: env!("CAPTURE_CHANNELS").parse()
                .map_err(|_| "Failed to parse CAPTURE_CHANNELS")?,
            chunk_bytes: env!("CAPTURE_CHUNK_BYTES").parse()
                .map_err(|_| "Failed to parse CAPTURE_CHUNK_BYTES")?,
            capture_restart_cooldown: Duration::from_secs(
                env!("CAPTURE_RESTART_COOLDOWN_SECS").parse()
                    .map_err(|_| "Failed to parse CAPTURE_RESTART_COOLDOWN_SECS")?,
            ),
            capture_max_restarts: env!("CAPTURE_MAX_RESTARTS").parse()
                .map_err(|_| "Failed to parse CAPTURE_MAX_RESTARTS")?,

            playback_device: env!("PLAYBACK_DEVICE"),
            clip_dir: PathBuf::from(env!("CLIP_DIR")),
            player_command: env!("PLAYER_COMMAND"),
            settle_delay: Duration::from_millis(env!("SETTLE_DELAY_MS").parse()
                .map_err(|_| "Failed to parse SETTLE_DELAY_MS")?),

            read_chunk_bytes: env!("FRAME_READ_CHUNK_BYTES").parse()
                .map_err(|_| "Failed to parse FRAME_READ_CHUNK_BYTES")?,
            max_payload_bytes: env!("FRAME_MAX_PAYLOAD_BYTES").parse()
                .map_err(|_| "Failed to parse FRAME_MAX_PAYLOAD_BYTES")?,

            status_interval: Duration::from_secs(env!("STATUS_INTERVAL_SECS").parse()
                .map_err(|_| "Failed to parse STATUS_INTERVAL_SECS")?),
            status_notify_addr: if notify_addr.is_empty() {
                None
            } else {
                Some(notify_addr.to_string())
            },
        })
    }

    /// 用命令行参数 `HOST[:PORT]` 覆盖控制器地址
    pub fn apply_address_override(&mut self, arg: &str) -> Result<(), String> {
        let arg = arg.trim();
        if arg.is_empty() {
            return Err("empty controller address".to_string());
        }
        match arg.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() {
                    return Err(format!("missing host in '{}'", arg));
                }
                self.port = port
                    .parse()
                    .map_err(|_| format!("invalid port in '{}'", arg))?;
                self.host = host.to_string();
            }
            None => self.host = arg.to_string(),
        }
        Ok(())
    }

    pub fn controller_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}
