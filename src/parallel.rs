use crate::error::PipelineError;
use crate::processor::ChunkProcessor;
use crate::reorder::ReorderBuffer;
use crate::types::AudioChunk;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;

type Completed = (u64, Result<AudioChunk, PipelineError>);

/// 順序を保証するワーカープール
///
/// チャンクに連番を付けて rayon のプールで処理し、完了順に関係なく
/// 投入順に結果を返す。同時に処理中のチャンク数は `workers × 2` まで。
pub struct OrderedWorkers {
    pool: rayon::ThreadPool,
    processor: Arc<ChunkProcessor>,
    sample_rate: u32,
    results_tx: Sender<Completed>,
    results_rx: Receiver<Completed>,
    reorder: ReorderBuffer<Result<AudioChunk, PipelineError>>,
    next_seq: u64,
    in_flight: usize,
    max_in_flight: usize,
}

impl OrderedWorkers {
    pub fn new(
        workers: usize,
        processor: Arc<ChunkProcessor>,
        sample_rate: u32,
    ) -> Result<Self, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("denoise-worker-{}", i))
            .build()?;
        let (results_tx, results_rx) = unbounded();

        log::info!("ワーカープールを開始しました ({} スレッド)", workers);

        Ok(Self {
            pool,
            processor,
            sample_rate,
            results_tx,
            results_rx,
            reorder: ReorderBuffer::new(),
            next_seq: 0,
            in_flight: 0,
            max_in_flight: workers * 2,
        })
    }

    /// チャンクを投入
    pub fn submit(&mut self, chunk: AudioChunk) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_flight += 1;

        let processor = Arc::clone(&self.processor);
        let tx = self.results_tx.clone();
        let sample_rate = self.sample_rate;

        self.pool.spawn(move || {
            let result = processor.process(chunk, sample_rate);
            // 受信側が先に終了している場合は結果を捨てる
            let _ = tx.send((seq, result));
        });
    }

    /// 処理中のチャンク数が上限に達しているか
    pub fn is_saturated(&self) -> bool {
        self.in_flight >= self.max_in_flight
    }

    /// 処理中（未取り出し）のチャンク数
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// 次の順番の結果を取り出す
    ///
    /// `wait` が true の場合は結果が届くまでブロックする。
    /// 処理中のチャンクがない、または待たずに取り出せる結果がない場合は `None`。
    pub fn next_in_order(&mut self, wait: bool) -> Option<Result<AudioChunk, PipelineError>> {
        loop {
            if let Some(result) = self.reorder.pop_next() {
                self.in_flight -= 1;
                return Some(result);
            }
            if self.in_flight == 0 {
                return None;
            }

            let received = if wait {
                self.results_rx.recv().ok()
            } else {
                self.results_rx.try_recv().ok()
            };

            match received {
                Some((seq, result)) => self.reorder.insert(seq, result),
                None => return None,
            }
        }
    }
}
