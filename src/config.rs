use crate::types::StreamConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub denoise: DenoiseConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// オーディオ入力設定
///
/// オーディオデバイスからの入力に関する設定。
/// チャンネル数 (1) とビット深度 (16bit) は固定で、設定できない。
///
/// # デフォルト値
///
/// - `device_id`: "default" (システムのデフォルトデバイス)
/// - `sample_rate`: 16000 Hz
/// - `frames_per_chunk`: 1024 フレーム
/// - `queue_capacity`: 64 (ドライバーから受け取るバッファの保持数)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_frames_per_chunk")]
    pub frames_per_chunk: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// ノイズ除去（スペクトルゲート）設定
///
/// # デフォルト値
///
/// - `n_fft`: 512
/// - `hop_length`: 128
/// - `n_std_thresh`: 1.5 (閾値 = 平均 + 標準偏差 × この値)
/// - `prop_decrease`: 1.0 (ノイズ成分の減衰率、0.0-1.0)
/// - `freq_mask_smooth_hz`: 500 Hz
/// - `time_mask_smooth_ms`: 50 ms
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DenoiseConfig {
    #[serde(default = "default_n_fft")]
    pub n_fft: usize,
    #[serde(default = "default_hop_length")]
    pub hop_length: usize,
    #[serde(default = "default_n_std_thresh")]
    pub n_std_thresh: f32,
    #[serde(default = "default_prop_decrease")]
    pub prop_decrease: f32,
    #[serde(default = "default_freq_mask_smooth_hz")]
    pub freq_mask_smooth_hz: f32,
    #[serde(default = "default_time_mask_smooth_ms")]
    pub time_mask_smooth_ms: f32,
}

/// 処理設定
///
/// - `workers`: 1 の場合は単一ループで逐次処理、2 以上でワーカープールを使用
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// 出力設定
///
/// - `output_path`: "cleaned_audio.wav"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub output_path: String,
}

// Default functions
fn default_device_id() -> String {
    "default".to_string()
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_frames_per_chunk() -> usize {
    1024
}

fn default_queue_capacity() -> usize {
    64
}

fn default_n_fft() -> usize {
    512
}

fn default_hop_length() -> usize {
    128
}

fn default_n_std_thresh() -> f32 {
    1.5
}

fn default_prop_decrease() -> f32 {
    1.0
}

fn default_freq_mask_smooth_hz() -> f32 {
    500.0
}

fn default_time_mask_smooth_ms() -> f32 {
    50.0
}

fn default_workers() -> usize {
    1
}

fn default_output_path() -> String {
    "cleaned_audio.wav".to_string()
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            sample_rate: default_sample_rate(),
            frames_per_chunk: default_frames_per_chunk(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            n_fft: default_n_fft(),
            hop_length: default_hop_length(),
            n_std_thresh: default_n_std_thresh(),
            prop_decrease: default_prop_decrease(),
            freq_mask_smooth_hz: default_freq_mask_smooth_hz(),
            time_mask_smooth_ms: default_time_mask_smooth_ms(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_path: default_output_path(),
        }
    }
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// TOML形式の設定ファイルをパースしてConfig構造体を生成する。
    ///
    /// # Errors
    ///
    /// ファイルの読み込みまたはパースに失敗した場合にエラーを返す。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use denoise_recorder::config::Config;
    /// let config = Config::from_file("config.toml").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        Ok(config)
    }

    /// デフォルト設定をファイルに書き出し
    ///
    /// 既存のファイルは上書きされる。
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).with_context(|| "設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    ///
    /// # Errors
    ///
    /// ファイルが存在するがパースに失敗した場合にエラーを返す。
    /// ファイルが存在しない場合はエラーにならず、デフォルト設定を返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "設定ファイルが見つかりません。デフォルト設定を使用します: {:?}",
                path.as_ref()
            );
            Ok(Config::default())
        }
    }

    /// 設定値を検証して、実行中不変のストリーム設定を生成
    pub fn stream_config(&self) -> Result<StreamConfig> {
        if self.audio.sample_rate == 0 {
            anyhow::bail!("sample_rate は 1 以上を指定してください");
        }
        if self.audio.frames_per_chunk == 0 {
            anyhow::bail!("frames_per_chunk は 1 以上を指定してください");
        }
        if self.audio.queue_capacity == 0 {
            anyhow::bail!("queue_capacity は 1 以上を指定してください");
        }
        if self.denoise.n_fft < 2 {
            anyhow::bail!("n_fft は 2 以上を指定してください: {}", self.denoise.n_fft);
        }
        if self.denoise.hop_length == 0 || self.denoise.hop_length > self.denoise.n_fft {
            anyhow::bail!(
                "hop_length は 1 以上 n_fft ({}) 以下を指定してください: {}",
                self.denoise.n_fft,
                self.denoise.hop_length
            );
        }
        if !(0.0..=1.0).contains(&self.denoise.prop_decrease) {
            anyhow::bail!(
                "prop_decrease は 0.0-1.0 の範囲で指定してください: {}",
                self.denoise.prop_decrease
            );
        }
        if self.processing.workers == 0 {
            anyhow::bail!("workers は 1 以上を指定してください");
        }
        if self.output.output_path.is_empty() {
            anyhow::bail!("output_path が空です");
        }

        Ok(StreamConfig::new(
            self.audio.sample_rate,
            self.audio.frames_per_chunk,
            &self.output.output_path,
        ))
    }
}
