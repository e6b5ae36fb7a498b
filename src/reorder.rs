use std::collections::BTreeMap;

/// 完了順に届いた結果を、連番の順に並べ直すバッファ
///
/// # Examples
///
/// ```
/// # use denoise_recorder::reorder::ReorderBuffer;
/// let mut reorder = ReorderBuffer::new();
/// reorder.insert(1, "b");
/// assert_eq!(reorder.pop_next(), None);
/// reorder.insert(0, "a");
/// assert_eq!(reorder.pop_next(), Some("a"));
/// assert_eq!(reorder.pop_next(), Some("b"));
/// ```
pub struct ReorderBuffer<T> {
    next: u64,
    pending: BTreeMap<u64, T>,
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    /// 連番 `seq` の結果を格納
    pub fn insert(&mut self, seq: u64, item: T) {
        if seq < self.next {
            log::warn!("取り出し済みの連番を受信しました: {}", seq);
            return;
        }
        self.pending.insert(seq, item);
    }

    /// 次の連番の結果が揃っていれば取り出す
    pub fn pop_next(&mut self) -> Option<T> {
        let item = self.pending.remove(&self.next)?;
        self.next += 1;
        Some(item)
    }

    /// 次に取り出す連番
    #[cfg(test)]
    fn next_seq(&self) -> u64 {
        self.next
    }

    /// 順番待ちの結果数
    #[cfg(test)]
    fn waiting(&self) -> usize {
        self.pending.len()
    }
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
