//! ALSA PCM devices for capture and clip playback.

use std::path::Path;

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{CaptureDevice, PlaybackDevice};

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
struct AlsaParams {
    sample_rate: u32,
    channels: u32,
    period_size: usize,
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    dir_name: &str,
) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        pcm.hw_params(&hwp)?;
    }

    let params = {
        let hwp = pcm.hw_params_current()?;
        AlsaParams {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
        }
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    Ok((pcm, params))
}

// ======================== Capture ========================

/// Microphone capture, S16LE interleaved.
pub struct AlsaCapture {
    pcm: PCM,
    samples: Vec<i16>,
}

impl AlsaCapture {
    pub fn open(device: &str, sample_rate: u32, channels: u32) -> Result<Self> {
        let (pcm, params) = open_pcm(device, Direction::Capture, sample_rate, channels, "Capture")?;
        if params.sample_rate != sample_rate {
            log::warn!(
                "Capture rate negotiated to {}Hz instead of {}Hz",
                params.sample_rate,
                sample_rate
            );
        }
        Ok(Self {
            pcm,
            samples: Vec::new(),
        })
    }
}

impl CaptureDevice for AlsaCapture {
    fn start_capture(&mut self) -> Result<()> {
        self.pcm.prepare().context("preparing capture PCM")?;
        self.pcm.start().context("starting capture PCM")?;
        log::info!("ALSA capture started");
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.samples.resize(buf.len() / 2, 0);
        let io = self.pcm.io_i16()?;

        let frames = match io.readi(&mut self.samples) {
            Ok(n) => n,
            Err(e) => {
                // XRUN: recover once and retry before reporting a failed read
                log::warn!("ALSA capture error: {}, recovering...", e);
                self.pcm.prepare().context("recovering capture PCM")?;
                io.readi(&mut self.samples).context("capture read after recovery")?
            }
        };

        let channels = self.pcm.hw_params_current()?.get_channels()? as usize;
        let n_samples = frames * channels;
        for (dst, s) in buf.chunks_exact_mut(2).zip(&self.samples[..n_samples]) {
            dst.copy_from_slice(&s.to_le_bytes());
        }
        Ok(n_samples * 2)
    }

    fn stop_capture(&mut self) {
        if let Err(e) = self.pcm.drop() {
            log::warn!("Failed to stop ALSA capture: {}", e);
        }
        log::info!("ALSA capture stopped");
    }
}

// ======================== Playback ========================

struct LoadedClip {
    pcm: PCM,
    channels: u32,
    samples: Vec<i16>,
}

/// Plays 16-bit WAV clips on an ALSA output.
pub struct AlsaPlayer {
    device: String,
    loaded: Option<LoadedClip>,
}

impl AlsaPlayer {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            loaded: None,
        }
    }
}

fn load_clip(device: &str, clip: &Path) -> Result<LoadedClip> {
    let mut reader = hound::WavReader::open(clip)
        .with_context(|| format!("Failed to open WAV clip {}", clip.display()))?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        anyhow::bail!(
            "Unsupported WAV format: {} bits {:?}",
            spec.bits_per_sample,
            spec.sample_format
        );
    }
    let samples = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to read WAV samples")?;

    let (pcm, params) = open_pcm(
        device,
        Direction::Playback,
        spec.sample_rate,
        spec.channels as u32,
        "Playback",
    )?;
    Ok(LoadedClip {
        pcm,
        channels: params.channels,
        samples,
    })
}

fn write_clip(clip: &LoadedClip) -> Result<()> {
    let io = clip.pcm.io_i16()?;
    let channels = clip.channels.max(1) as usize;
    let total_frames = clip.samples.len() / channels;
    let mut frames_written = 0;
    let mut retry_count = 0u32;

    while frames_written < total_frames {
        let offset = frames_written * channels;
        match io.writei(&clip.samples[offset..]) {
            Ok(n) => {
                frames_written += n;
                retry_count = 0;
            }
            Err(e) => {
                log::warn!("ALSA XRUN or error: {}, recovering...", e);
                retry_count += 1;
                clip.pcm.prepare().context("Failed to recover PCM playback")?;
                // device keeps falling behind: give up on the rest of the clip
                if retry_count >= 3 {
                    log::error!(
                        "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                        retry_count,
                        total_frames - frames_written
                    );
                    break;
                }
            }
        }
    }
    clip.pcm.drain().context("draining playback PCM")?;
    Ok(())
}

#[async_trait]
impl PlaybackDevice for AlsaPlayer {
    async fn prepare(&mut self, clip: &Path) -> Result<()> {
        let device = self.device.clone();
        let clip = clip.to_path_buf();
        let loaded = tokio::task::spawn_blocking(move || load_clip(&device, &clip)).await??;
        self.loaded = Some(loaded);
        Ok(())
    }

    async fn play(&mut self) -> Result<()> {
        let clip = self
            .loaded
            .take()
            .ok_or_else(|| anyhow::anyhow!("no clip prepared"))?;
        let (clip, result) = tokio::task::spawn_blocking(move || {
            let result = write_clip(&clip);
            (clip, result)
        })
        .await?;
        self.loaded = Some(clip);
        result
    }

    fn release(&mut self) {
        // dropping the PCM closes the device
        self.loaded = None;
    }
}
