use std::path::{Path, PathBuf};

/// 16ビット整数型のオーディオサンプル
///
/// PCM形式の音声データを表現するための型エイリアス。
/// -32768 から 32767 の範囲の値を取る。
pub type SampleI16 = i16;

/// チャンネル数（モノラル固定）
pub const CHANNEL_COUNT: u16 = 1;

/// 量子化ビット数（16bit固定）
pub const BIT_DEPTH: u16 = 16;

/// オーディオフォーマット情報
///
/// 音声データのサンプリングレートとチャンネル数を保持する。
///
/// # Examples
///
/// ```
/// # use denoise_recorder::types::AudioFormat;
/// let format = AudioFormat::mono(16000);
/// assert_eq!(format.channels, 1);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    /// サンプリングレート (Hz)
    pub sample_rate: u32,

    /// チャンネル数
    pub channels: u16,
}

impl AudioFormat {
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: CHANNEL_COUNT,
        }
    }
}

/// オーディオチャンク
///
/// 固定長の音声サンプル列。キャプチャ → ノイズ除去 → 蓄積 の順に
/// 所有権ごと受け渡され、同じチャンクが複数の段で共有されることはない。
///
/// # Examples
///
/// ```
/// # use denoise_recorder::types::{AudioChunk, AudioFormat};
/// let chunk = AudioChunk::new(vec![0i16; 1024], AudioFormat::mono(16000));
/// assert_eq!(chunk.len(), 1024);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioChunk {
    /// PCM音声サンプルの配列
    pub samples: Vec<SampleI16>,

    /// オーディオフォーマット情報
    pub format: AudioFormat,
}

impl AudioChunk {
    pub fn new(samples: Vec<SampleI16>, format: AudioFormat) -> Self {
        Self { samples, format }
    }

    /// サンプル数
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// ストリーム設定
///
/// 起動時に一度だけ生成され、以後は読み取り専用で各コンポーネントに渡される。
/// チャンネル数とビット深度は固定値。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    sample_rate: u32,
    frames_per_chunk: usize,
    output_path: PathBuf,
}

impl StreamConfig {
    pub fn new(sample_rate: u32, frames_per_chunk: usize, output_path: impl Into<PathBuf>) -> Self {
        Self {
            sample_rate,
            frames_per_chunk,
            output_path: output_path.into(),
        }
    }

    pub fn channel_count(&self) -> u16 {
        CHANNEL_COUNT
    }

    pub fn bit_depth(&self) -> u16 {
        BIT_DEPTH
    }

    /// 1サンプルあたりのバイト数
    pub fn sample_width_bytes(&self) -> u16 {
        BIT_DEPTH / 8
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames_per_chunk(&self) -> usize {
        self.frames_per_chunk
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat::mono(self.sample_rate)
    }
}

/// 蓄積ループの状態
///
/// `Running` → `Stopping` → `Stopped` の一方向にのみ遷移する。
/// `Stopped` は終端状態。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccumulatorState {
    /// キャプチャ・処理・追加を繰り返している
    Running,

    /// 書き出しとデバイス解放を実行中
    Stopping,

    /// 終了済み（以後の読み込み・追加・書き込みは行わない）
    Stopped,
}

/// 入力デバイスハンドルの状態
///
/// Closed → Open は構築時のみ、Open → Closed は解放時のみ。再オープンはしない。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Open,
    Closed,
}

/// 1回の実行の集計結果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// 蓄積したチャンク数
    pub chunks: usize,

    /// 蓄積したサンプル数
    pub samples: usize,

    /// 書き出したファイル（空ストリームの場合は None）
    pub output_path: Option<PathBuf>,
}

impl RunSummary {
    /// 録音時間（秒）
    pub fn duration_seconds(&self, sample_rate: u32) -> f64 {
        self.samples as f64 / sample_rate as f64
    }
}
