//! 分区位点水位线
//!
//! Kafka 只能按分区提交"连续已完成"的位点，而投递在并发处理时会乱序完成。
//! `OffsetTracker` 记录每个分区尚未完成的位点，只有当最小的未完成位点向前推进时才产生新的提交位点，
//! 保证提交永远不会越过仍在处理中的消息。

use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
struct PartitionState {
    pending: BTreeSet<i64>,
    highest_seen: Option<i64>,
    last_committed: Option<i64>,
}

impl PartitionState {
    /// 下一条待消费位点，即 Kafka 提交语义下的提交值
    fn watermark(&self) -> Option<i64> {
        match self.pending.first() {
            Some(&lowest) => Some(lowest),
            None => self.highest_seen.map(|h| h + 1),
        }
    }
}

/// 按 (topic, partition) 维护的位点跟踪器
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<(String, i32), PartitionState>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一条已收到、尚未完成的投递
    pub fn track(&mut self, topic: &str, partition: i32, offset: i64) {
        let state = self
            .partitions
            .entry((topic.to_string(), partition))
            .or_default();
        state.pending.insert(offset);
        state.highest_seen = Some(state.highest_seen.map_or(offset, |h| h.max(offset)));
    }

    /// 标记一条投递处理完成
    ///
    /// 当可提交位点前进时返回新的提交值（下一条待消费位点），否则返回 `None`。
    pub fn complete(&mut self, topic: &str, partition: i32, offset: i64) -> Option<i64> {
        let state = self.partitions.get_mut(&(topic.to_string(), partition))?;
        if !state.pending.remove(&offset) {
            return None;
        }

        let watermark = state.watermark()?;
        if state.last_committed.is_some_and(|c| c >= watermark) {
            return None;
        }
        state.last_committed = Some(watermark);
        Some(watermark)
    }

    pub fn pending_count(&self, topic: &str, partition: i32) -> usize {
        self.partitions
            .get(&(topic.to_string(), partition))
            .map_or(0, |s| s.pending.len())
    }
}
