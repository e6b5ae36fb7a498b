use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 停止要求トークン
///
/// Ctrl+C ハンドラなど外部から停止を要求し、蓄積ループが
/// 各反復の先頭で確認する。複製しても同じフラグを共有する。
#[derive(Clone, Debug, Default)]
pub struct StopToken {
    stopped: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}
