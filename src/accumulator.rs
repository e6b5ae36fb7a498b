use crate::audio_input::CaptureSource;
use crate::buffer::FrameBuffer;
use crate::error::PipelineError;
use crate::parallel::OrderedWorkers;
use crate::processor::ChunkProcessor;
use crate::stop_token::StopToken;
use crate::types::{AccumulatorState, RunSummary, StreamConfig};
use crate::wav_writer::{OutputWriter, WavWriter};
use std::sync::Arc;

/// キャプチャ → ノイズ除去 → 蓄積 のループと、停止時の書き出し・解放
///
/// 状態は `Running` → `Stopping` → `Stopped` と遷移する。
/// 停止要求は各反復の先頭（追加の後、次の読み込みの前）でのみ確認するため、
/// 処理中のチャンクは必ず追加されてから停止する。
///
/// 読み込みエラーや形状不一致で異常終了した場合も、それまでに
/// 蓄積したチャンクは書き出してからデバイスを解放し、エラーを返す。
pub struct StreamAccumulator<S, W = WavWriter> {
    config: StreamConfig,
    source: S,
    processor: Arc<ChunkProcessor>,
    writer: W,
    buffer: FrameBuffer,
    state: AccumulatorState,
    workers: usize,
    summary: RunSummary,
}

impl<S: CaptureSource, W: OutputWriter> StreamAccumulator<S, W> {
    /// 開いた直後の取得元から作成する（初期状態は `Running`）
    pub fn new(config: StreamConfig, source: S, processor: Arc<ChunkProcessor>, writer: W) -> Self {
        let buffer = FrameBuffer::new(config.frames_per_chunk());
        Self {
            config,
            source,
            processor,
            writer,
            buffer,
            state: AccumulatorState::Running,
            workers: 1,
            summary: RunSummary::default(),
        }
    }

    /// ワーカー数を設定（2 以上で並列処理）
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// 停止要求まで、または致命的なエラーまでループを実行する
    ///
    /// 終了時は書き出しとデバイス解放の両方を必ず試みる。
    /// 返すエラーの優先順位は キャプチャ > 書き出し > 解放。
    pub fn run(&mut self, stop: &StopToken) -> Result<RunSummary, PipelineError> {
        if self.state == AccumulatorState::Stopped {
            log::warn!("蓄積ループは既に停止しています");
            return Ok(self.summary.clone());
        }

        log::info!(
            "蓄積ループを開始します ({}Hz, {}フレーム/チャンク, ワーカー {})",
            self.config.sample_rate(),
            self.config.frames_per_chunk(),
            self.workers
        );

        let captured = if self.workers > 1 {
            self.capture_parallel(stop)
        } else {
            self.capture_sequential(stop)
        };

        match &captured {
            Ok(()) => log::info!("停止要求を受けました。蓄積ループを終了します"),
            Err(e) => log::error!("{} 段階で致命的なエラー: {}", e.stage(), e),
        }

        let (written, closed) = self.shutdown();

        captured?;
        written?;
        closed?;
        Ok(self.summary.clone())
    }

    fn capture_sequential(&mut self, stop: &StopToken) -> Result<(), PipelineError> {
        let frames = self.config.frames_per_chunk();
        let sample_rate = self.config.sample_rate();

        while !stop.is_stop_requested() {
            let chunk = self.source.read_chunk(frames)?;
            let processed = self.processor.process(chunk, sample_rate)?;
            self.buffer.push(processed)?;
            log::debug!("チャンク {} を追加しました", self.buffer.len());
        }
        Ok(())
    }

    fn capture_parallel(&mut self, stop: &StopToken) -> Result<(), PipelineError> {
        let frames = self.config.frames_per_chunk();
        let mut workers = OrderedWorkers::new(
            self.workers,
            Arc::clone(&self.processor),
            self.config.sample_rate(),
        )?;

        while !stop.is_stop_requested() {
            let chunk = match self.source.read_chunk(frames) {
                Ok(chunk) => chunk,
                Err(e) => {
                    // 投入済みのチャンクは最初の処理エラーまで追加してから終了する
                    log::info!(
                        "読み込みエラーのため処理中の {} チャンクを待機します",
                        workers.in_flight()
                    );
                    if let Err(process_err) = self.append_completed(&mut workers, true) {
                        log::error!("{}", process_err);
                    }
                    return Err(e);
                }
            };
            workers.submit(chunk);
            self.append_completed(&mut workers, false)?;
        }

        // 処理中のチャンクはすべて追加してから停止する
        log::debug!("処理中の {} チャンクを待機します", workers.in_flight());
        self.append_completed(&mut workers, true)
    }

    /// 順番の揃った処理結果を追加する
    ///
    /// `drain_all` が true の場合は処理中のチャンクがなくなるまで待つ。
    /// そうでない場合は処理中の数が上限に達しているときだけ待つ。
    fn append_completed(
        &mut self,
        workers: &mut OrderedWorkers,
        drain_all: bool,
    ) -> Result<(), PipelineError> {
        loop {
            let wait = drain_all || workers.is_saturated();
            match workers.next_in_order(wait) {
                Some(result) => {
                    self.buffer.push(result?)?;
                    log::debug!("チャンク {} を追加しました", self.buffer.len());
                }
                None => return Ok(()),
            }
        }
    }

    /// 書き出しとデバイス解放
    ///
    /// どちらかが失敗しても、もう一方は実行する。
    fn shutdown(&mut self) -> (Result<(), PipelineError>, Result<(), PipelineError>) {
        self.state = AccumulatorState::Stopping;

        self.summary.chunks = self.buffer.len();
        self.summary.samples = self.buffer.total_samples();

        let written = if self.buffer.is_empty() {
            log::info!("記録された音声がないため、ファイルは作成しません");
            Ok(())
        } else {
            let samples = self.buffer.drain();
            let path = self.config.output_path();
            let result = self.writer.write_file(
                path,
                self.config.channel_count(),
                self.config.sample_width_bytes(),
                self.config.sample_rate(),
                &samples,
            );
            match &result {
                Ok(()) => self.summary.output_path = Some(path.to_path_buf()),
                Err(e) => log::error!("{}", e),
            }
            result
        };

        let closed = self.source.close();
        match &closed {
            Ok(()) => log::info!("音声リソースを解放しました"),
            Err(e) => log::error!("{}", e),
        }

        self.state = AccumulatorState::Stopped;
        (written, closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DenoiseConfig;
    use crate::denoise::{NoiseReducer, SpectralGate};
    use crate::types::{AudioChunk, AudioFormat, DeviceState, SampleI16};
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    enum Step {
        Chunk(Vec<SampleI16>),
        /// チャンクを返すと同時に停止要求を出す（処理中に Ctrl+C）
        ChunkThenStop(Vec<SampleI16>),
        Fail,
    }

    /// 台本どおりにチャンクを返す取得元
    struct ScriptedSource {
        steps: VecDeque<Step>,
        stop: StopToken,
        reads: usize,
        releases: usize,
        state: DeviceState,
        fail_close: bool,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>, stop: &StopToken) -> Self {
            Self {
                steps: steps.into(),
                stop: stop.clone(),
                reads: 0,
                releases: 0,
                state: DeviceState::Open,
                fail_close: false,
            }
        }
    }

    impl CaptureSource for ScriptedSource {
        fn read_chunk(&mut self, _frames: usize) -> Result<AudioChunk, PipelineError> {
            assert_eq!(self.state, DeviceState::Open, "閉じた後に読み込まれた");
            self.reads += 1;
            let format = AudioFormat::mono(16000);
            match self.steps.pop_front() {
                Some(Step::Chunk(samples)) => Ok(AudioChunk::new(samples, format)),
                Some(Step::ChunkThenStop(samples)) => {
                    self.stop.request_stop();
                    Ok(AudioChunk::new(samples, format))
                }
                Some(Step::Fail) | None => {
                    Err(PipelineError::DeviceRead("device unplugged".to_string()))
                }
            }
        }

        fn close(&mut self) -> Result<(), PipelineError> {
            if self.state == DeviceState::Closed {
                return Ok(());
            }
            self.state = DeviceState::Closed;
            self.releases += 1;
            if self.fail_close {
                return Err(PipelineError::DeviceClose("pause failed".to_string()));
            }
            Ok(())
        }

        fn state(&self) -> DeviceState {
            self.state
        }
    }

    /// 書き込みを記録するだけの出力先
    #[derive(Default)]
    struct RecordingWriter {
        calls: Vec<(PathBuf, u16, u16, u32, Vec<SampleI16>)>,
        fail: bool,
    }

    impl OutputWriter for RecordingWriter {
        fn write_file(
            &mut self,
            path: &Path,
            channel_count: u16,
            sample_width_bytes: u16,
            sample_rate: u32,
            samples: &[SampleI16],
        ) -> Result<(), PipelineError> {
            self.calls.push((
                path.to_path_buf(),
                channel_count,
                sample_width_bytes,
                sample_rate,
                samples.to_vec(),
            ));
            if self.fail {
                return Err(PipelineError::Write {
                    path: path.to_path_buf(),
                    source: hound::Error::IoError(std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        "read-only",
                    )),
                });
            }
            Ok(())
        }
    }

    /// 全サンプルの符号を反転する（順序確認用）
    struct Negate;

    impl NoiseReducer for Negate {
        fn reduce(&self, samples: &[SampleI16], _sample_rate: u32) -> Vec<SampleI16> {
            samples.iter().map(|s| s.saturating_neg()).collect()
        }
    }

    /// 先頭の値が小さいほど処理が遅い
    struct SlowForEarly;

    impl NoiseReducer for SlowForEarly {
        fn reduce(&self, samples: &[SampleI16], _sample_rate: u32) -> Vec<SampleI16> {
            let delay = 30u64.saturating_sub(samples[0].max(0) as u64 * 3);
            thread::sleep(Duration::from_millis(delay));
            samples.to_vec()
        }
    }

    struct Truncating;

    impl NoiseReducer for Truncating {
        fn reduce(&self, samples: &[SampleI16], _sample_rate: u32) -> Vec<SampleI16> {
            samples[1..].to_vec()
        }
    }

    fn processor(reducer: impl NoiseReducer + 'static) -> Arc<ChunkProcessor> {
        Arc::new(ChunkProcessor::new(Box::new(reducer)))
    }

    fn ramp(start: i16, len: usize) -> Vec<SampleI16> {
        (0..len as i16).map(|i| start.wrapping_add(i)).collect()
    }

    #[test]
    fn test_clean_stop_after_three_chunks_writes_3072_samples() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cleaned_audio.wav");
        let config = StreamConfig::new(16000, 1024, &path);
        let stop = StopToken::new();

        let source = ScriptedSource::new(
            vec![
                Step::Chunk(vec![100; 1024]),
                Step::Chunk(vec![200; 1024]),
                Step::ChunkThenStop(vec![300; 1024]),
            ],
            &stop,
        );
        let gate = SpectralGate::new(&DenoiseConfig::default());
        let mut accumulator = StreamAccumulator::new(config, source, processor(gate), WavWriter::new());

        assert_eq!(accumulator.state(), AccumulatorState::Running);
        let summary = accumulator.run(&stop).unwrap();

        assert_eq!(accumulator.state(), AccumulatorState::Stopped);
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.samples, 3072);
        assert_eq!(summary.output_path.as_deref(), Some(path.as_path()));
        assert_eq!(accumulator.source().reads, 3);
        assert_eq!(accumulator.source().state(), DeviceState::Closed);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.duration(), 3072);
    }

    #[test]
    fn test_output_is_processed_chunks_in_capture_order() {
        let config = StreamConfig::new(16000, 8, "out.wav");
        let stop = StopToken::new();

        let chunks: Vec<Vec<i16>> = (0..5).map(|n| ramp(n * 10, 8)).collect();
        let mut steps: Vec<Step> = chunks[..4].iter().cloned().map(Step::Chunk).collect();
        steps.push(Step::ChunkThenStop(chunks[4].clone()));

        let source = ScriptedSource::new(steps, &stop);
        let mut accumulator =
            StreamAccumulator::new(config, source, processor(Negate), RecordingWriter::default());
        accumulator.run(&stop).unwrap();

        let expected: Vec<i16> = chunks.iter().flatten().map(|s| -s).collect();
        let calls = &accumulator.writer().calls;
        assert_eq!(calls.len(), 1);
        let (path, channels, width, rate, samples) = &calls[0];
        assert_eq!(path, Path::new("out.wav"));
        assert_eq!((*channels, *width, *rate), (1, 2, 16000));
        assert_eq!(samples, &expected);
    }

    #[test]
    fn test_stop_before_first_chunk_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.wav");
        let config = StreamConfig::new(16000, 1024, &path);
        let stop = StopToken::new();
        stop.request_stop();

        let source = ScriptedSource::new(vec![Step::Chunk(vec![0; 1024])], &stop);
        let mut accumulator = StreamAccumulator::new(config, source, processor(Negate), WavWriter::new());
        let summary = accumulator.run(&stop).unwrap();

        assert_eq!(summary, RunSummary::default());
        assert!(!path.exists());
        assert_eq!(accumulator.source().reads, 0);
        assert_eq!(accumulator.source().releases, 1);
        assert_eq!(accumulator.state(), AccumulatorState::Stopped);
    }

    #[test]
    fn test_read_error_mid_stream_flushes_partial_data() {
        let config = StreamConfig::new(16000, 1024, "partial.wav");
        let stop = StopToken::new();

        let source = ScriptedSource::new(
            vec![
                Step::Chunk(vec![1; 1024]),
                Step::Chunk(vec![2; 1024]),
                Step::Fail,
            ],
            &stop,
        );
        let mut accumulator =
            StreamAccumulator::new(config, source, processor(Negate), RecordingWriter::default());

        let err = accumulator.run(&stop).unwrap_err();
        assert!(matches!(err, PipelineError::DeviceRead(_)));
        assert_eq!(accumulator.state(), AccumulatorState::Stopped);

        let calls = &accumulator.writer().calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].4.len(), 2048);
        assert_eq!(accumulator.source().releases, 1);
    }

    #[test]
    fn test_read_error_before_any_chunk_writes_nothing() {
        let config = StreamConfig::new(16000, 1024, "none.wav");
        let stop = StopToken::new();

        let source = ScriptedSource::new(vec![Step::Fail], &stop);
        let mut accumulator =
            StreamAccumulator::new(config, source, processor(Negate), RecordingWriter::default());

        assert!(accumulator.run(&stop).is_err());
        assert!(accumulator.writer().calls.is_empty());
        assert_eq!(accumulator.source().releases, 1);
    }

    #[test]
    fn test_shape_mismatch_aborts_without_appending() {
        let config = StreamConfig::new(16000, 1024, "bad.wav");
        let stop = StopToken::new();

        let source = ScriptedSource::new(
            vec![Step::Chunk(vec![1; 1024]), Step::Chunk(vec![2; 1024])],
            &stop,
        );
        let mut accumulator =
            StreamAccumulator::new(config, source, processor(Truncating), RecordingWriter::default());

        let err = accumulator.run(&stop).unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch { expected: 1024, actual: 1023 }));
        assert_eq!(accumulator.source().reads, 1);
        assert!(accumulator.writer().calls.is_empty());
        assert_eq!(accumulator.source().releases, 1);
    }

    #[test]
    fn test_write_failure_still_releases_device() {
        let config = StreamConfig::new(16000, 4, "readonly.wav");
        let stop = StopToken::new();

        let source = ScriptedSource::new(vec![Step::ChunkThenStop(vec![5; 4])], &stop);
        let writer = RecordingWriter {
            fail: true,
            ..RecordingWriter::default()
        };
        let mut accumulator = StreamAccumulator::new(config, source, processor(Negate), writer);

        let err = accumulator.run(&stop).unwrap_err();
        assert_eq!(err.stage(), crate::error::Stage::Write);
        assert_eq!(accumulator.source().releases, 1);
        assert_eq!(accumulator.state(), AccumulatorState::Stopped);
    }

    #[test]
    fn test_close_failure_after_successful_write() {
        let config = StreamConfig::new(16000, 4, "ok.wav");
        let stop = StopToken::new();

        let mut source = ScriptedSource::new(vec![Step::ChunkThenStop(vec![5; 4])], &stop);
        source.fail_close = true;
        let mut accumulator =
            StreamAccumulator::new(config, source, processor(Negate), RecordingWriter::default());

        let err = accumulator.run(&stop).unwrap_err();
        assert_eq!(err.stage(), crate::error::Stage::Close);
        assert_eq!(accumulator.writer().calls.len(), 1);
    }

    #[test]
    fn test_run_after_stopped_does_nothing() {
        let config = StreamConfig::new(16000, 4, "twice.wav");
        let stop = StopToken::new();

        let source = ScriptedSource::new(
            vec![Step::ChunkThenStop(vec![1; 4]), Step::Chunk(vec![2; 4])],
            &stop,
        );
        let mut accumulator =
            StreamAccumulator::new(config, source, processor(Negate), RecordingWriter::default());

        let first = accumulator.run(&stop).unwrap();
        let second = accumulator.run(&StopToken::new()).unwrap();

        assert_eq!(first, second);
        assert_eq!(accumulator.source().reads, 1);
        assert_eq!(accumulator.writer().calls.len(), 1);
    }

    #[test]
    fn test_parallel_workers_preserve_capture_order() {
        let config = StreamConfig::new(16000, 16, "parallel.wav");
        let stop = StopToken::new();

        let chunks: Vec<Vec<i16>> = (0..12).map(|n| vec![n; 16]).collect();
        let mut steps: Vec<Step> = chunks[..11].iter().cloned().map(Step::Chunk).collect();
        steps.push(Step::ChunkThenStop(chunks[11].clone()));

        let source = ScriptedSource::new(steps, &stop);
        let mut accumulator =
            StreamAccumulator::new(config, source, processor(SlowForEarly), RecordingWriter::default())
                .with_workers(4);

        let summary = accumulator.run(&stop).unwrap();

        // 停止時点で処理中だったチャンクも含めて全て追加される
        assert_eq!(summary.chunks, 12);
        let expected: Vec<i16> = chunks.into_iter().flatten().collect();
        assert_eq!(accumulator.writer().calls[0].4, expected);
    }

    /// 一定時間待ってからそのまま返す
    struct SlowIdentity;

    impl NoiseReducer for SlowIdentity {
        fn reduce(&self, samples: &[SampleI16], _sample_rate: u32) -> Vec<SampleI16> {
            thread::sleep(Duration::from_millis(20));
            samples.to_vec()
        }
    }

    #[test]
    fn test_parallel_read_error_flushes_partial_data() {
        for workers in [1, 4] {
            let config = StreamConfig::new(16000, 4, "parallel_partial.wav");
            let stop = StopToken::new();

            let source = ScriptedSource::new(
                vec![
                    Step::Chunk(vec![1; 4]),
                    Step::Chunk(vec![2; 4]),
                    Step::Chunk(vec![3; 4]),
                    Step::Fail,
                ],
                &stop,
            );
            let mut accumulator = StreamAccumulator::new(
                config,
                source,
                processor(SlowIdentity),
                RecordingWriter::default(),
            )
            .with_workers(workers);

            let err = accumulator.run(&stop).unwrap_err();
            assert!(matches!(err, PipelineError::DeviceRead(_)));

            // ワーカー数に関係なく、読み込み済みの3チャンクが順番通りに書き出される
            let calls = &accumulator.writer().calls;
            assert_eq!(calls.len(), 1, "workers = {}", workers);
            assert_eq!(calls[0].4, vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]);
            assert_eq!(accumulator.source().releases, 1);
            assert_eq!(accumulator.state(), AccumulatorState::Stopped);
        }
    }

    #[test]
    fn test_parallel_shape_mismatch_aborts() {
        let config = StreamConfig::new(16000, 4, "parallel_bad.wav");
        let stop = StopToken::new();

        let source = ScriptedSource::new(
            vec![Step::Chunk(vec![1; 4]), Step::ChunkThenStop(vec![2; 4])],
            &stop,
        );
        let mut accumulator =
            StreamAccumulator::new(config, source, processor(Truncating), RecordingWriter::default())
                .with_workers(2);

        let err = accumulator.run(&stop).unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch { .. }));
        assert!(accumulator.writer().calls.is_empty());
        assert_eq!(accumulator.source().releases, 1);
    }
}
