use crate::error::PipelineError;
use crate::types::{AudioChunk, SampleI16};

/// 処理済みチャンクの蓄積バッファ
///
/// 追加専用で、キャプチャ順をそのまま保持する。
/// 停止時に `drain` で一度だけ取り出される。
pub struct FrameBuffer {
    frames_per_chunk: usize,
    chunks: Vec<AudioChunk>,
    total_samples: usize,
}

impl FrameBuffer {
    pub fn new(frames_per_chunk: usize) -> Self {
        Self {
            frames_per_chunk,
            chunks: Vec::new(),
            total_samples: 0,
        }
    }

    /// チャンクを末尾に追加
    ///
    /// 設定と長さが異なるチャンクは追加せず `ShapeMismatch` を返す。
    pub fn push(&mut self, chunk: AudioChunk) -> Result<(), PipelineError> {
        if chunk.len() != self.frames_per_chunk {
            return Err(PipelineError::ShapeMismatch {
                expected: self.frames_per_chunk,
                actual: chunk.len(),
            });
        }

        self.total_samples += chunk.len();
        self.chunks.push(chunk);
        Ok(())
    }

    /// 全チャンクを順番通りに連結して取り出し、バッファを空にする
    pub fn drain(&mut self) -> Vec<SampleI16> {
        let mut samples = Vec::with_capacity(self.total_samples);
        for chunk in self.chunks.drain(..) {
            samples.extend(chunk.samples);
        }
        self.total_samples = 0;
        samples
    }

    /// バッファ内のチャンク数
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// バッファが空かどうか
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// バッファ内のサンプル数
    pub fn total_samples(&self) -> usize {
        self.total_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AudioFormat;

    fn chunk(value: i16, len: usize) -> AudioChunk {
        AudioChunk::new(vec![value; len], AudioFormat::mono(16000))
    }

    #[test]
    fn test_push_and_drain_preserves_order() {
        let mut buffer = FrameBuffer::new(4);
        buffer.push(chunk(1, 4)).unwrap();
        buffer.push(chunk(2, 4)).unwrap();
        buffer.push(chunk(3, 4)).unwrap();

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.total_samples(), 12);

        let samples = buffer.drain();
        assert_eq!(samples, vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]);

        // 取り出し後は空
        assert!(buffer.is_empty());
        assert_eq!(buffer.total_samples(), 0);
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        let mut buffer = FrameBuffer::new(1024);
        buffer.push(chunk(0, 1024)).unwrap();

        let err = buffer.push(chunk(0, 512)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ShapeMismatch {
                expected: 1024,
                actual: 512
            }
        ));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.total_samples(), 1024);
    }
}
