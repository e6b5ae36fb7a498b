use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// 失敗したパイプラインの段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Open,
    Read,
    Process,
    Write,
    Close,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Open => "open",
            Stage::Read => "read",
            Stage::Process => "process",
            Stage::Write => "write",
            Stage::Close => "close",
        };
        f.write_str(name)
    }
}

/// キャプチャ・処理・書き出しパイプラインのエラー
///
/// バッファオーバーフローはエラーではなく、キャプチャ側で回復する。
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 起動時に入力デバイスを開けない（使用中・存在しない・権限なし）
    #[error("入力デバイスを開けません: {0}")]
    DeviceUnavailable(String),

    /// ループ中の回復不能な読み込み失敗（デバイス取り外し・ハンドル無効化）
    #[error("入力デバイスの読み込みに失敗: {0}")]
    DeviceRead(String),

    /// ノイズ除去の結果、チャンクの長さが変わった
    #[error("チャンクの形状が一致しません: 期待 {expected} サンプル, 実際 {actual} サンプル")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("ワーカープールの構築に失敗: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("WAVファイルの書き込みに失敗: {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("入力デバイスの解放に失敗: {0}")]
    DeviceClose(String),
}

impl PipelineError {
    /// エラーが発生した段
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::DeviceUnavailable(_) => Stage::Open,
            PipelineError::DeviceRead(_) => Stage::Read,
            PipelineError::ShapeMismatch { .. } | PipelineError::WorkerPool(_) => Stage::Process,
            PipelineError::Write { .. } => Stage::Write,
            PipelineError::DeviceClose(_) => Stage::Close,
        }
    }
}
