//! denoise-recorder - リアルタイムノイズ除去レコーダー
//!
//! このクレートは、モノラルの音声入力をチャンク単位でキャプチャし、
//! 各チャンクのノイズを除去して蓄積し、停止時にWAVファイルとして保存する。
//!
//! # 主な機能
//!
//! - **音声入力**: cpal による 16bit モノラル入力（オーバーフロー時も継続）
//! - **ノイズ除去**: チャンクごとに独立したスペクトルゲート
//! - **蓄積**: キャプチャ順を保ったまま処理済みチャンクを保持
//! - **WAVファイル出力**: Ctrl+C による停止時に一度だけ書き出し
//! - **並列処理**: 必要に応じてワーカープールで処理（順序は保証）
//!
//! # アーキテクチャ
//!
//! ```text
//! [Audio Device] → [AudioInput] → [ChunkProcessor] → [FrameBuffer]
//!                       ↑                                  │
//!                  read_chunk                        停止時に drain
//!                       │                                  ↓
//!               [StreamAccumulator] ──────────────→ [WavWriter]
//!                       ↑
//!                  [StopToken] ← Ctrl+C
//! ```
//!
//! # 使用例
//!
//! ```no_run
//! use denoise_recorder::config::Config;
//!
//! // 設定ファイルを読み込み
//! let config = Config::load_or_default("config.toml").unwrap();
//! let stream = config.stream_config().unwrap();
//! assert_eq!(stream.channel_count(), 1);
//! ```

pub mod accumulator;
pub mod audio_input;
pub mod buffer;
pub mod capture_queue;
pub mod config;
pub mod denoise;
pub mod error;
pub mod parallel;
pub mod processor;
pub mod reorder;
pub mod stop_token;
pub mod types;
pub mod wav_writer;
