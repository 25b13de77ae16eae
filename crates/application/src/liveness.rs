//! 心跳检测
//!
//! 每个连接一个状态机：`Alive -> AwaitingPong -> Dead`。
//! 每隔固定间隔发送一次探测并开始计时，超时前收到 pong 则回到 `Alive`，
//! 否则进入终态 `Dead`，由调用方关闭连接并将其从注册表驱逐。

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    Alive,
    AwaitingPong { deadline: Instant },
    Dead,
}

/// 单连接心跳状态机，本身不持有计时器
#[derive(Debug)]
pub struct Liveness {
    state: LivenessState,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            state: LivenessState::Alive,
        }
    }

    pub fn state(&self) -> LivenessState {
        self.state
    }

    pub fn is_dead(&self) -> bool {
        self.state == LivenessState::Dead
    }

    /// 探测已发出，返回本轮的截止时间；已死亡的连接不再探测
    pub fn ping_sent(&mut self, now: Instant, timeout: Duration) -> Option<Instant> {
        match self.state {
            LivenessState::Dead => None,
            LivenessState::AwaitingPong { deadline } => Some(deadline),
            LivenessState::Alive => {
                let deadline = now + timeout;
                self.state = LivenessState::AwaitingPong { deadline };
                Some(deadline)
            }
        }
    }

    pub fn pong_received(&mut self) {
        if let LivenessState::AwaitingPong { .. } = self.state {
            self.state = LivenessState::Alive;
        }
    }

    /// 截止时间已过仍未收到 pong 时进入 `Dead`，仅在转换发生时返回 true
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.state {
            LivenessState::AwaitingPong { deadline } if now >= deadline => {
                self.state = LivenessState::Dead;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(1),
        }
    }
}

/// 监控结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessExit {
    /// 超时未收到 pong
    Dead,
    /// 探测帧无法写出
    PingFailed,
    /// 连接已因其他原因被驱逐
    Cancelled,
}

/// 连接读取任务收到 pong 时调用
#[derive(Debug, Clone)]
pub struct PongSignal(mpsc::Sender<()>);

impl PongSignal {
    pub fn notify(&self) {
        // 已有未处理的 pong 时无需重复
        let _ = self.0.try_send(());
    }
}

/// 驱动单个连接的心跳状态机，计时器随取消令牌一起结束
pub struct LivenessMonitor {
    settings: HeartbeatSettings,
    pongs: mpsc::Receiver<()>,
    cancel: CancellationToken,
}

impl LivenessMonitor {
    pub fn new(settings: HeartbeatSettings, cancel: CancellationToken) -> (Self, PongSignal) {
        let (tx, rx) = mpsc::channel(1);
        let monitor = Self {
            settings,
            pongs: rx,
            cancel,
        };
        (monitor, PongSignal(tx))
    }

    /// `ping` 发送一次心跳，返回 false 表示连接已不可写
    pub async fn run<F>(mut self, mut ping: F) -> LivenessExit
    where
        F: FnMut() -> bool + Send,
    {
        let mut machine = Liveness::new();
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.settings.interval,
            self.settings.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return LivenessExit::Cancelled,
                _ = ticker.tick() => {}
            }

            // 丢弃上一轮之后迟到的 pong
            while self.pongs.try_recv().is_ok() {}

            if !ping() {
                return LivenessExit::PingFailed;
            }
            let Some(deadline) = machine.ping_sent(Instant::now(), self.settings.timeout) else {
                return LivenessExit::Dead;
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return LivenessExit::Cancelled,
                Some(()) = self.pongs.recv() => machine.pong_received(),
                _ = tokio::time::sleep_until(deadline) => {
                    machine.expire(Instant::now());
                    return LivenessExit::Dead;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn settings() -> HeartbeatSettings {
        HeartbeatSettings::default()
    }

    #[test]
    fn state_machine_transitions() {
        let start = Instant::now();
        let mut liveness = Liveness::new();
        assert_eq!(liveness.state(), LivenessState::Alive);

        let deadline = liveness
            .ping_sent(start, Duration::from_secs(1))
            .unwrap();
        assert_eq!(liveness.state(), LivenessState::AwaitingPong { deadline });

        assert!(!liveness.expire(start));
        liveness.pong_received();
        assert_eq!(liveness.state(), LivenessState::Alive);

        liveness.ping_sent(start, Duration::from_secs(1));
        assert!(liveness.expire(start + Duration::from_secs(1)));
        assert!(liveness.is_dead());

        // 终态
        assert!(!liveness.expire(start + Duration::from_secs(5)));
        liveness.pong_received();
        assert!(liveness.is_dead());
        assert!(liveness.ping_sent(start, Duration::from_secs(1)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_dies_after_interval_plus_timeout() {
        let (monitor, _pong) = LivenessMonitor::new(settings(), CancellationToken::new());
        let pings = Arc::new(AtomicUsize::new(0));
        let counter = pings.clone();

        let start = Instant::now();
        let exit = monitor
            .run(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            })
            .await;

        assert_eq!(exit, LivenessExit::Dead);
        assert_eq!(pings.load(Ordering::SeqCst), 1);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(6));
        assert!(elapsed < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn responsive_peer_stays_alive_until_cancelled() {
        let cancel = CancellationToken::new();
        let (monitor, pong) = LivenessMonitor::new(settings(), cancel.clone());
        let pings = Arc::new(AtomicUsize::new(0));
        let counter = pings.clone();

        let task = tokio::spawn(monitor.run(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            pong.notify();
            true
        }));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!task.is_finished());
        assert_eq!(pings.load(Ordering::SeqCst), 6);

        cancel.cancel();
        assert_eq!(task.await.unwrap(), LivenessExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn late_pong_does_not_revive() {
        let (monitor, pong) = LivenessMonitor::new(settings(), CancellationToken::new());

        let exit = monitor
            .run(move || {
                let pong = pong.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(1500)).await;
                    pong.notify();
                });
                true
            })
            .await;

        assert_eq!(exit, LivenessExit::Dead);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_while_awaiting_pong_stops_timer() {
        let cancel = CancellationToken::new();
        let (monitor, _pong) = LivenessMonitor::new(settings(), cancel.clone());
        let trigger = cancel.clone();

        let exit = monitor
            .run(move || {
                trigger.cancel();
                true
            })
            .await;

        assert_eq!(exit, LivenessExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn unwritable_ping_ends_monitor() {
        let (monitor, _pong) = LivenessMonitor::new(settings(), CancellationToken::new());
        assert_eq!(monitor.run(|| false).await, LivenessExit::PingFailed);
    }
}
