/*
 * ModularRack - Patchable Modular Synthesizer Core
 * Copyright (c) 2025 MACHIKO LAB
 *
 * Audio engine - device-independent renderer plus the cpal output stream
 */

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, SampleRate, Stream, StreamConfig, SupportedBufferSize};
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::errors::{ConfigError, EngineError, EngineResult};
use crate::graph::Patch;
use crate::nodes::TerminalOutputNode;
use crate::processing::{ProcessContext, SignalNode};

/// レンダリング統計（オーディオスレッドが更新、コントロールスレッドが読む）
#[derive(Debug, Default)]
pub struct RenderStats {
    blocks: AtomicU64,
    samples: AtomicU64,
    failed_blocks: AtomicU64,
}

/// 統計のスナップショット
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub blocks: u64,
    pub samples: u64,
    pub failed_blocks: u64,
}

impl RenderStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            blocks: self.blocks.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            failed_blocks: self.failed_blocks.load(Ordering::Relaxed),
        }
    }
}

/// デバイス非依存のレンダラー
///
/// ドライバーのコールバックから呼ばれ、出力ノードをプルしてバッファを埋める。
/// どんな失敗でも要求されたサンプル数を無音で埋めて返す。
pub struct Renderer {
    output: Arc<TerminalOutputNode>,
    context: ProcessContext,
    max_block_size: usize,
    mono: Vec<f32>,
    stats: Arc<RenderStats>,
}

impl Renderer {
    pub fn new(output: Arc<TerminalOutputNode>, config: &EngineConfig) -> Result<Self, ConfigError> {
        Self::with_stats(output, config, Arc::new(RenderStats::default()))
    }

    pub fn with_stats(
        output: Arc<TerminalOutputNode>,
        config: &EngineConfig,
        stats: Arc<RenderStats>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::assemble(output, config, stats))
    }

    /// 検証済みの設定から組み立てる
    fn assemble(output: Arc<TerminalOutputNode>, config: &EngineConfig, stats: Arc<RenderStats>) -> Self {
        let max_block_size = config.max_block_size.max(1);
        Self {
            output,
            context: config.context(),
            max_block_size,
            mono: vec![0.0; max_block_size],
            stats,
        }
    }

    pub fn stats(&self) -> Arc<RenderStats> {
        Arc::clone(&self.stats)
    }

    pub fn context(&self) -> &ProcessContext {
        &self.context
    }

    /// `buffer[offset..offset + count]` を埋め、常に `count` を返す
    pub fn fill(&mut self, buffer: &mut [f32], offset: usize, count: usize) -> usize {
        let start = offset.min(buffer.len());
        let end = offset.saturating_add(count).min(buffer.len());
        let block = &mut buffer[start..end];
        block.fill(0.0);

        if block.len() < count {
            self.stats.failed_blocks.fetch_add(1, Ordering::Relaxed);
        }

        for chunk in block.chunks_mut(self.max_block_size) {
            let ctx = self.context;
            let output = &self.output;
            let rendered = panic::catch_unwind(AssertUnwindSafe(|| output.process(chunk, &ctx)));
            if rendered.is_err() {
                chunk.fill(0.0);
                self.stats.failed_blocks.fetch_add(1, Ordering::Relaxed);
            }
            self.context.sample_index += chunk.len() as u64;
        }

        self.stats.blocks.fetch_add(1, Ordering::Relaxed);
        self.stats.samples.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// インターリーブされたデバイスバッファを埋める（全チャンネルに同じモノラル信号）
    pub fn render_interleaved(&mut self, data: &mut [f32], channels: usize) {
        if channels <= 1 {
            let len = data.len();
            self.fill(data, 0, len);
            return;
        }

        let mut mono = std::mem::take(&mut self.mono);
        for frames in data.chunks_mut(self.max_block_size * channels) {
            frames.fill(0.0);
            let frame_count = frames.len() / channels;
            let mono = &mut mono[..frame_count];
            self.fill(mono, 0, frame_count);

            for (frame, sample) in frames.chunks_exact_mut(channels).zip(mono.iter()) {
                frame.fill(*sample);
            }
        }
        self.mono = mono;
    }
}

/// オーディオエンジン - パッチと出力ストリームを所有する
pub struct AudioEngine {
    config: EngineConfig,
    patch: Patch,
    stats: Arc<RenderStats>,
    stream: Option<Stream>,
    device_name: Option<String>,
}

impl AudioEngine {
    /// エンジンを作成（デバイスは `start()` まで開かない）
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let patch = Patch::new(&config)?;
        Ok(Self {
            config,
            patch,
            stats: Arc::new(RenderStats::default()),
            stream: None,
            device_name: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn patch(&self) -> &Patch {
        &self.patch
    }

    pub fn patch_mut(&mut self) -> &mut Patch {
        &mut self.patch
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_playing(&self) -> bool {
        self.stream.is_some()
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    /// パッチの出力をレンダリングするレンダラー（オフライン用）
    pub fn renderer(&self) -> Renderer {
        // 設定は new() で検証済み
        Renderer::assemble(self.patch.output(), &self.config, Arc::clone(&self.stats))
    }

    /// 出力デバイス一覧
    pub fn list_output_devices() -> EngineResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| EngineError::AudioDevice(format!("Failed to enumerate devices: {}", e)))?;
        Ok(devices.filter_map(|device| device.name().ok()).collect())
    }

    fn select_device(&self) -> EngineResult<Device> {
        let host = cpal::default_host();
        match &self.config.device_name {
            Some(wanted) => {
                let mut devices = host
                    .output_devices()
                    .map_err(|e| EngineError::AudioDevice(format!("Failed to enumerate devices: {}", e)))?;
                devices
                    .find(|device| device.name().map(|name| name.contains(wanted.as_str())).unwrap_or(false))
                    .ok_or_else(|| EngineError::AudioDevice(format!("No output device matching '{}'", wanted)))
            }
            None => host
                .default_output_device()
                .ok_or_else(|| EngineError::AudioDevice("No output device available".to_string())),
        }
    }

    /// 再生開始
    pub fn start(&mut self) -> EngineResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let device = self.select_device()?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let channels = device
            .default_output_config()
            .map_err(|e| EngineError::AudioDevice(format!("Failed to query device config: {}", e)))?
            .channels();

        // 設定のレートを f32 で出せる構成を探す
        let sample_rate = SampleRate(self.config.sample_rate);
        let supported = device
            .supported_output_configs()
            .map_err(|e| EngineError::AudioDevice(format!("Failed to query supported configs: {}", e)))?
            .filter(|range| range.channels() == channels && range.sample_format() == SampleFormat::F32)
            .find(|range| range.min_sample_rate() <= sample_rate && sample_rate <= range.max_sample_rate())
            .ok_or_else(|| {
                EngineError::AudioDevice(format!(
                    "Device '{}' does not support {} Hz f32 output with {} channels",
                    name, self.config.sample_rate, channels
                ))
            })?;

        let buffer_size = device_buffer_size(supported.buffer_size(), self.config.device_buffer_frames());
        let stream_config = StreamConfig {
            channels,
            sample_rate,
            buffer_size,
        };

        let mut renderer = self.renderer();
        let channel_count = usize::from(channels);
        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    renderer.render_interleaved(data, channel_count);
                },
                |err| {
                    error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| EngineError::Stream(format!("Failed to create audio stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| EngineError::Stream(format!("Failed to start audio stream: {}", e)))?;

        info!(
            device = %name,
            sample_rate = self.config.sample_rate,
            channels,
            buffer_size = ?buffer_size,
            "Audio engine started"
        );
        self.stream = Some(stream);
        self.device_name = Some(name);
        Ok(())
    }

    /// 再生停止
    pub fn stop(&mut self) -> EngineResult<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        stream
            .pause()
            .map_err(|e| EngineError::Stream(format!("Failed to stop audio stream: {}", e)))?;

        let stats = self.stats.snapshot();
        if stats.failed_blocks > 0 {
            warn!(failed_blocks = stats.failed_blocks, "Blocks were replaced with silence");
        }
        info!(blocks = stats.blocks, samples = stats.samples, "Audio engine stopped");
        Ok(())
    }
}

/// デバイスが受け付ける範囲にバッファサイズを収める。範囲不明ならデバイス任せ
fn device_buffer_size(supported: &SupportedBufferSize, frames: u32) -> BufferSize {
    match *supported {
        SupportedBufferSize::Range { min, max } if min <= max => BufferSize::Fixed(frames.clamp(min, max)),
        _ => BufferSize::Default,
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop audio engine: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::junction::tests::source;
    use crate::nodes::ModuleType;
    use crate::processing::NodeId;
    use std::f32::consts::TAU;

    fn config() -> EngineConfig {
        EngineConfig {
            parameter_ramp_seconds: 0.0,
            ..EngineConfig::default()
        }
    }

    fn sine_engine(config: EngineConfig) -> AudioEngine {
        let mut engine = AudioEngine::new(config).unwrap();
        let patch = engine.patch_mut();
        let vco = patch.add_module(ModuleType::Oscillator);
        let out = patch.output_id();
        patch.connect(vco, out, "in").unwrap();
        patch.set_parameter(out, "volume", 1.0).unwrap();
        engine
    }

    fn reference_sine(k: usize) -> f32 {
        (TAU * 440.0 * k as f32 / 44100.0).sin()
    }

    /// 処理中にパニックするテスト用ノード
    struct Exploding;

    impl SignalNode for Exploding {
        fn process(&self, _out: &mut [f32], _ctx: &ProcessContext) {
            panic!("node failure");
        }
    }

    #[test]
    fn test_sine_end_to_end() {
        let engine = sine_engine(config());
        let mut renderer = engine.renderer();

        let mut buffer = vec![0.0; 100];
        assert_eq!(renderer.fill(&mut buffer, 0, 100), 100);
        for (k, sample) in buffer.iter().enumerate() {
            assert!((sample - reference_sine(k)).abs() < 1e-4, "k = {}", k);
        }
        assert_eq!(renderer.context().sample_index, 100);
    }

    #[test]
    fn test_mixer_end_to_end() {
        let mut engine = AudioEngine::new(config()).unwrap();
        let output = engine.patch().output();
        let patch = engine.patch_mut();
        let mixer = patch.add_module(ModuleType::Mixer);
        let out = patch.output_id();
        patch.connect(mixer, out, "in").unwrap();
        patch.set_parameter(out, "volume", 1.0).unwrap();
        patch.set_parameter(mixer, "vol1", 0.5).unwrap();
        patch.set_parameter(mixer, "vol_out", 1.0).unwrap();

        let (stub_id, stub) = source(1.0);
        patch.mixer(mixer).unwrap().input("in1").unwrap().add_source(stub_id, &stub);

        let mut renderer = Renderer::new(output, engine.config()).unwrap();
        for count in [1, 64, 512] {
            let mut buffer = vec![0.0; count];
            renderer.fill(&mut buffer, 0, count);
            assert!(buffer.iter().all(|&s| s == 0.5));
        }
    }

    #[test]
    fn test_fill_with_offset() {
        let engine = sine_engine(config());
        let mut renderer = engine.renderer();

        let mut buffer = vec![7.0; 20];
        assert_eq!(renderer.fill(&mut buffer, 5, 10), 10);
        assert!(buffer[..5].iter().all(|&s| s == 7.0));
        assert!(buffer[15..].iter().all(|&s| s == 7.0));
        for k in 0..10 {
            assert!((buffer[5 + k] - reference_sine(k)).abs() < 1e-4);
        }
    }

    #[test]
    fn test_fill_out_of_range_is_silent() {
        let engine = sine_engine(config());
        let mut renderer = engine.renderer();

        let mut buffer = vec![3.0; 8];
        assert_eq!(renderer.fill(&mut buffer, 4, 100), 100);
        assert!(buffer[..4].iter().all(|&s| s == 3.0));
        assert_eq!(renderer.stats().snapshot().failed_blocks, 1);

        assert_eq!(renderer.fill(&mut buffer, 50, 10), 10);
        assert_eq!(renderer.stats().snapshot().failed_blocks, 2);
    }

    #[test]
    fn test_large_requests_are_split() {
        let engine = sine_engine(EngineConfig {
            max_block_size: 16,
            ..config()
        });
        let mut renderer = engine.renderer();

        let mut buffer = vec![0.0; 100];
        renderer.fill(&mut buffer, 0, 100);
        for (k, sample) in buffer.iter().enumerate() {
            assert!((sample - reference_sine(k)).abs() < 1e-4, "k = {}", k);
        }
    }

    #[test]
    fn test_panicking_node_degrades_to_silence() {
        let engine = sine_engine(config());
        let output = engine.patch().output();
        let bomb_id: NodeId = uuid::Uuid::new_v4();
        let bomb: Arc<dyn SignalNode> = Arc::new(Exploding);
        output.main_input().add_source(bomb_id, &bomb);

        let mut renderer = engine.renderer();
        let mut buffer = vec![1.0; 64];
        assert_eq!(renderer.fill(&mut buffer, 0, 64), 64);
        assert!(buffer.iter().all(|&s| s == 0.0));
        assert_eq!(renderer.stats().snapshot().failed_blocks, 1);

        // 原因を外せば次のブロックから復帰する
        output.main_input().remove_source(bomb_id);
        renderer.fill(&mut buffer, 0, 64);
        assert!(buffer.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_render_interleaved_duplicates_channels() {
        let engine = sine_engine(EngineConfig {
            max_block_size: 8,
            ..config()
        });
        let mut renderer = engine.renderer();

        let mut data = vec![0.0; 2 * 30 + 1];
        renderer.render_interleaved(&mut data, 2);
        for k in 0..30 {
            assert_eq!(data[2 * k], data[2 * k + 1]);
            assert!((data[2 * k] - reference_sine(k)).abs() < 1e-4);
        }
        assert_eq!(data[60], 0.0);
    }

    #[test]
    fn test_device_buffer_size_is_clamped() {
        let range = SupportedBufferSize::Range { min: 64, max: 1024 };
        assert_eq!(device_buffer_size(&range, 2205), BufferSize::Fixed(1024));
        assert_eq!(device_buffer_size(&range, 16), BufferSize::Fixed(64));
        assert_eq!(device_buffer_size(&range, 512), BufferSize::Fixed(512));
        assert_eq!(device_buffer_size(&SupportedBufferSize::Unknown, 512), BufferSize::Default);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = EngineConfig {
            sample_rate: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            AudioEngine::new(config.clone()),
            Err(EngineError::Config(ConfigError::Invalid(_)))
        ));

        let output = Arc::new(TerminalOutputNode::new("AUDIO OUT".to_string(), &config));
        assert!(matches!(Renderer::new(output, &config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_engine_stats_shared_with_renderer() {
        let engine = sine_engine(config());
        let mut renderer = engine.renderer();
        let mut buffer = vec![0.0; 32];
        renderer.fill(&mut buffer, 0, 32);
        renderer.fill(&mut buffer, 0, 32);

        let stats = engine.stats();
        assert_eq!(stats.blocks, 2);
        assert_eq!(stats.samples, 64);
        assert!(!engine.is_playing());
    }
}
