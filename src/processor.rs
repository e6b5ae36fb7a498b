use crate::denoise::NoiseReducer;
use crate::error::PipelineError;
use crate::types::AudioChunk;

/// 1チャンク単位のノイズ除去
///
/// 過去のチャンクの情報は持たない。同じ入力には常に同じ出力を返すため、
/// 逐次ループからでもワーカーからでも呼び出せる。
pub struct ChunkProcessor {
    reducer: Box<dyn NoiseReducer>,
}

impl ChunkProcessor {
    pub fn new(reducer: Box<dyn NoiseReducer>) -> Self {
        Self { reducer }
    }

    /// チャンクを処理して新しいチャンクを返す
    ///
    /// 長さが変わった場合は `ShapeMismatch` を返し、結果は破棄する。
    pub fn process(&self, chunk: AudioChunk, sample_rate: u32) -> Result<AudioChunk, PipelineError> {
        let expected = chunk.len();
        let samples = self.reducer.reduce(&chunk.samples, sample_rate);

        if samples.len() != expected {
            return Err(PipelineError::ShapeMismatch {
                expected,
                actual: samples.len(),
            });
        }

        Ok(AudioChunk::new(samples, chunk.format))
    }
}
