//! 进程生命周期
//!
//! 收到停止信号后通知所有任务收尾，并以宽限时间限制收尾过程：
//! 宽限从信号到达时开始计时，超时后不再等待，进程直接退出。

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

/// 任务的结束方式
#[derive(Debug, PartialEq, Eq)]
pub enum Shutdown<T> {
    /// 未收到停止信号，任务自行结束
    Exited(T),
    /// 收到停止信号后在宽限时间内完成收尾
    Drained(T),
    /// 宽限时间耗尽，任务被放弃
    TimedOut,
}

/// 运行 `work`，直到它结束或 `stop` 触发
///
/// `stop` 触发后向 `stopping` 写入 `true`，再最多等待 `grace`。
/// 超时后丢弃 `work`，调用方负责中止仍在运行的后台任务。
pub async fn run_with_grace<W, S>(
    work: W,
    stop: S,
    grace: Duration,
    stopping: &watch::Sender<bool>,
) -> Shutdown<W::Output>
where
    W: Future,
    S: Future<Output = ()>,
{
    tokio::pin!(work);

    tokio::select! {
        out = &mut work => return Shutdown::Exited(out),
        _ = stop => {}
    }

    info!(grace_ms = grace.as_millis() as u64, "收到停止信号，开始收尾");
    // 没有订阅者时发送失败，收尾仍按宽限时间进行
    let _ = stopping.send(true);

    match tokio::time::timeout(grace, work).await {
        Ok(out) => Shutdown::Drained(out),
        Err(_) => {
            warn!(grace_ms = grace.as_millis() as u64, "宽限时间内未完成收尾，放弃等待");
            Shutdown::TimedOut
        }
    }
}
