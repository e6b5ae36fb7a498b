use crate::capture_queue::{capture_queue, CaptureFeed, ChunkReader};
use crate::config::AudioConfig;
use crate::error::PipelineError;
use crate::types::{AudioChunk, DeviceState, StreamConfig};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};

/// 音声の取得元
///
/// 入力デバイスを排他的に所有し、固定長のチャンクを要求に応じて返す。
pub trait CaptureSource {
    /// `frames` サンプル揃うまでブロックしてチャンクを返す
    ///
    /// ドライバーレベルのオーバーフローはエラーにせず、手元のデータで継続する。
    fn read_chunk(&mut self, frames: usize) -> Result<AudioChunk, PipelineError>;

    /// ストリームを停止してデバイスを解放する
    ///
    /// 解放済みのハンドルに対して呼んでも何もしない。
    fn close(&mut self) -> Result<(), PipelineError>;

    fn state(&self) -> DeviceState;
}

/// 開いている入力ストリームを表すハンドル
///
/// 構築時に Open、`close` で Closed になり、再び開かれることはない。
pub struct DeviceHandle<R> {
    resource: Option<R>,
}

impl<R> DeviceHandle<R> {
    pub fn open(resource: R) -> Self {
        Self {
            resource: Some(resource),
        }
    }

    pub fn state(&self) -> DeviceState {
        if self.resource.is_some() {
            DeviceState::Open
        } else {
            DeviceState::Closed
        }
    }

    /// リソースを解放する
    ///
    /// # Returns
    /// * `Ok(true)` - 今回の呼び出しで解放した
    /// * `Ok(false)` - すでに解放済み（何もしない）
    pub fn close_with<E, F>(&mut self, release: F) -> Result<bool, E>
    where
        F: FnOnce(R) -> Result<(), E>,
    {
        match self.resource.take() {
            Some(resource) => release(resource).map(|()| true),
            None => Ok(false),
        }
    }
}

/// cpal を使ったモノラル音声入力
pub struct AudioInput {
    handle: DeviceHandle<cpal::Stream>,
    reader: ChunkReader,
    device_name: String,
}

impl AudioInput {
    /// 入力デバイスを開いてストリームを開始
    ///
    /// デバイスが見つからない、使用中、権限がないなどの場合は `DeviceUnavailable` を返す。
    pub fn open(audio: &AudioConfig, config: &StreamConfig) -> Result<Self, PipelineError> {
        let host = cpal::default_host();

        let device = if audio.device_id == "default" {
            host.default_input_device().ok_or_else(|| {
                PipelineError::DeviceUnavailable(
                    "デフォルト入力デバイスが見つかりません".to_string(),
                )
            })?
        } else {
            host.input_devices()
                .map_err(|e| PipelineError::DeviceUnavailable(e.to_string()))?
                .find(|d| d.name().ok().as_deref() == Some(audio.device_id.as_str()))
                .ok_or_else(|| {
                    PipelineError::DeviceUnavailable(format!(
                        "デバイスが見つかりません: {}",
                        audio.device_id
                    ))
                })?
        };

        let device_name = device.name().unwrap_or_else(|_| "(不明)".to_string());
        log::info!("入力デバイス: {}", device_name);

        let default_config = device.default_input_config().map_err(|e| {
            PipelineError::DeviceUnavailable(format!("デフォルト入力設定が取得できません: {}", e))
        })?;

        log::info!(
            "デバイス設定: {:?}, {}Hz, {}ch",
            default_config.sample_format(),
            default_config.sample_rate().0,
            default_config.channels()
        );

        let stream_config = cpal::StreamConfig {
            channels: config.channel_count(),
            sample_rate: cpal::SampleRate(config.sample_rate()),
            buffer_size: cpal::BufferSize::Fixed(config.frames_per_chunk() as u32),
        };

        let (feed, reader) = capture_queue(audio.queue_capacity, config.format());

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, feed)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, feed)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, feed)?,
            cpal::SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, feed)?,
            other => {
                return Err(PipelineError::DeviceUnavailable(format!(
                    "サポートされていないサンプルフォーマット: {:?}",
                    other
                )))
            }
        };

        stream.play().map_err(|e| {
            PipelineError::DeviceUnavailable(format!("ストリームの再生開始に失敗: {}", e))
        })?;

        log::info!(
            "音声入力ストリームを開始しました ({}Hz, {}ch, {}フレーム/バッファ)",
            config.sample_rate(),
            config.channel_count(),
            config.frames_per_chunk()
        );

        Ok(Self {
            handle: DeviceHandle::open(stream),
            reader,
            device_name,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// デバイス一覧を表示
    pub fn list_devices() -> anyhow::Result<()> {
        let host = cpal::default_host();
        println!("利用可能な入力デバイス:");
        println!();

        for (idx, device) in host.input_devices()?.enumerate() {
            let name = device.name()?;
            println!("  [{}] {}", idx, name);

            device.supported_input_configs()?.for_each(|config_range| {
                println!(
                    "      フォーマット: {:?}, {}-{}Hz, {}ch",
                    config_range.sample_format(),
                    config_range.min_sample_rate().0,
                    config_range.max_sample_rate().0,
                    config_range.channels()
                );
            });
            println!();
        }

        Ok(())
    }
}

/// デバイスのサンプルを16bit整数に変換
///
/// i16 はそのまま、それ以外は値域に合わせてスケーリングする。
fn to_i16<T>(sample: T) -> i16
where
    i16: FromSample<T>,
{
    i16::from_sample(sample)
}

/// ストリームを構築
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    feed: CaptureFeed,
) -> Result<cpal::Stream, PipelineError>
where
    T: SizedSample + Send + 'static,
    i16: FromSample<T>,
{
    let error_feed = feed.clone();

    let data_callback = move |data: &[T], _info: &cpal::InputCallbackInfo| {
        let samples = data.iter().map(|&sample| to_i16(sample)).collect();
        // 満杯の場合は feed 側でオーバーフローとして数える
        feed.push(samples);
    };

    let error_callback = move |err: cpal::StreamError| {
        log::error!("ストリームエラー: {}", err);
        if let cpal::StreamError::DeviceNotAvailable = err {
            error_feed.mark_device_lost();
        }
    };

    device
        .build_input_stream(config, data_callback, error_callback, None)
        .map_err(|e| PipelineError::DeviceUnavailable(format!("入力ストリームの構築に失敗: {}", e)))
}

impl CaptureSource for AudioInput {
    fn read_chunk(&mut self, frames: usize) -> Result<AudioChunk, PipelineError> {
        if self.handle.state() == DeviceState::Closed {
            return Err(PipelineError::DeviceRead(
                "入力ストリームは既に閉じられています".to_string(),
            ));
        }
        self.reader.read(frames)
    }

    fn close(&mut self) -> Result<(), PipelineError> {
        let released = self.handle.close_with(|stream| {
            let paused = stream
                .pause()
                .map_err(|e| PipelineError::DeviceClose(e.to_string()));
            drop(stream);
            paused
        })?;

        if released {
            log::info!(
                "音声入力ストリームを停止しました (破棄したバッファ: {})",
                self.reader.total_overflows()
            );
        }
        Ok(())
    }

    fn state(&self) -> DeviceState {
        self.handle.state()
    }
}

impl Drop for AudioInput {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("AudioInput のドロップ時にエラー: {}", e);
        }
    }
}
