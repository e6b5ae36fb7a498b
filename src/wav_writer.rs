use crate::error::PipelineError;
use crate::types::SampleI16;
use std::fs;
use std::path::Path;

/// 蓄積した音声の書き出し先
pub trait OutputWriter {
    /// 連結済みのフレームを一度に書き出す
    ///
    /// 停止時に一度だけ呼ばれる。
    fn write_file(
        &mut self,
        path: &Path,
        channel_count: u16,
        sample_width_bytes: u16,
        sample_rate: u32,
        samples: &[SampleI16],
    ) -> Result<(), PipelineError>;
}

/// 非圧縮PCMのWAVファイル書き出し（hound）
#[derive(Debug, Default)]
pub struct WavWriter;

impl WavWriter {
    pub fn new() -> Self {
        Self
    }
}

impl OutputWriter for WavWriter {
    fn write_file(
        &mut self,
        path: &Path,
        channel_count: u16,
        sample_width_bytes: u16,
        sample_rate: u32,
        samples: &[SampleI16],
    ) -> Result<(), PipelineError> {
        let write_error = |source: hound::Error| PipelineError::Write {
            path: path.to_path_buf(),
            source,
        };

        // 出力ディレクトリが存在しない場合は作成
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| write_error(hound::Error::IoError(e)))?;
            }
        }

        let spec = hound::WavSpec {
            channels: channel_count,
            sample_rate,
            bits_per_sample: sample_width_bytes * 8,
            sample_format: hound::SampleFormat::Int,
        };

        log::info!("WAVファイル作成: {:?}", path);

        let mut writer = hound::WavWriter::create(path, spec).map_err(write_error)?;
        for &sample in samples {
            writer.write_sample(sample).map_err(write_error)?;
        }
        writer.finalize().map_err(write_error)?;

        log::info!(
            "WAVファイル書き込み完了: {}サンプル ({:.2}秒)",
            samples.len(),
            samples.len() as f64 / (sample_rate as f64 * channel_count as f64)
        );

        Ok(())
    }
}
