use crate::error::PipelineError;
use crate::types::{AudioChunk, AudioFormat, SampleI16};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// デバイス喪失フラグを確認する間隔
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// ドライバーコールバックと読み込みループの間のキューを作成
///
/// `capacity` はコールバックから受け取ったバッファの保持数。
/// これを超えるとオーバーフローとして扱い、そのバッファは捨てられる。
pub fn capture_queue(capacity: usize, format: AudioFormat) -> (CaptureFeed, ChunkReader) {
    let (tx, rx) = bounded(capacity);
    let overflows = Arc::new(AtomicUsize::new(0));
    let device_lost = Arc::new(AtomicBool::new(false));

    let feed = CaptureFeed {
        tx,
        overflows: overflows.clone(),
        device_lost: device_lost.clone(),
    };
    let reader = ChunkReader {
        rx,
        overflows,
        device_lost,
        pending: Vec::new(),
        format,
        total_overflows: 0,
    };
    (feed, reader)
}

/// 生産者側（オーディオコールバックスレッドで使用）
///
/// ブロッキングしないこと。
#[derive(Clone)]
pub struct CaptureFeed {
    tx: Sender<Vec<SampleI16>>,
    overflows: Arc<AtomicUsize>,
    device_lost: Arc<AtomicBool>,
}

impl CaptureFeed {
    /// ドライバーから届いたサンプルを投入
    pub fn push(&self, samples: Vec<SampleI16>) {
        match self.tx.try_send(samples) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.overflows.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                // 読み込み側が終了済み
            }
        }
    }

    /// デバイスが失われたことを通知
    pub fn mark_device_lost(&self) {
        self.device_lost.store(true, Ordering::SeqCst);
    }
}

/// 消費者側: 固定長チャンクを組み立てるブロッキングリーダー
pub struct ChunkReader {
    rx: Receiver<Vec<SampleI16>>,
    overflows: Arc<AtomicUsize>,
    device_lost: Arc<AtomicBool>,
    pending: Vec<SampleI16>,
    format: AudioFormat,
    total_overflows: usize,
}

impl ChunkReader {
    /// `frames` サンプルが揃うまでブロックし、チャンクを返す
    ///
    /// オーバーフローが発生していても失敗せず、手元にあるデータでチャンクを作る。
    /// デバイス喪失またはストリーム切断の場合のみ `DeviceRead` を返す。
    pub fn read(&mut self, frames: usize) -> Result<AudioChunk, PipelineError> {
        while self.pending.len() < frames {
            if self.device_lost.load(Ordering::SeqCst) {
                return Err(PipelineError::DeviceRead(
                    "入力デバイスが利用できなくなりました".to_string(),
                ));
            }

            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(samples) => self.pending.extend(samples),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(PipelineError::DeviceRead(
                        "入力ストリームが切断されました".to_string(),
                    ));
                }
            }
        }

        let dropped = self.overflows.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            self.total_overflows += dropped;
            log::warn!(
                "入力バッファがオーバーフローしました: {} バッファを破棄 (累計 {})",
                dropped,
                self.total_overflows
            );
        }

        let samples: Vec<SampleI16> = self.pending.drain(..frames).collect();
        Ok(AudioChunk::new(samples, self.format))
    }

    /// これまでに破棄されたバッファ数
    pub fn total_overflows(&self) -> usize {
        self.total_overflows + self.overflows.load(Ordering::Relaxed)
    }
}
