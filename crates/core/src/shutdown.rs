use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

/// 组件级关闭信号
///
/// 分发器和编排引擎各持有一个，后台周期协程通过 [`ShutdownListener`] 监听。
/// 信号是电平触发的：触发之后再订阅的监听者也会立即返回。
#[derive(Clone)]
pub struct ShutdownSignal {
    component: Arc<str>,
    tx: Arc<watch::Sender<bool>>,
}

/// 关闭信号的监听端
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new(component: &str) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            component: Arc::from(component),
            tx: Arc::new(tx),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// 触发关闭，返回本次调用是否真正触发了信号
    pub fn trigger(&self) -> bool {
        let fired = self.tx.send_if_modified(|triggered| !std::mem::replace(triggered, true));
        if fired {
            info!(
                "{} 收到关闭信号，通知 {} 个后台协程",
                self.component,
                self.tx.receiver_count()
            );
        } else {
            debug!("{} 的关闭信号已触发过", self.component);
        }
        fired
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl ShutdownListener {
    /// 等待关闭信号
    ///
    /// 发送端全部释放时同样返回，后台协程不会因此悬挂。
    pub async fn recv(&mut self) {
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_listeners_wake_on_trigger() {
        let signal = ShutdownSignal::new("编排引擎");
        let mut first = signal.subscribe();
        let mut second = signal.clone().subscribe();

        assert!(signal.trigger());

        first.recv().await;
        second.recv().await;
        assert!(signal.is_triggered());
        assert_eq!(signal.component(), "编排引擎");
    }

    #[tokio::test]
    async fn test_late_listener_returns_immediately() {
        let signal = ShutdownSignal::new("任务分发器");
        signal.trigger();

        let mut listener = signal.subscribe();
        let woke = tokio::time::timeout(Duration::from_millis(100), listener.recv()).await;
        assert!(woke.is_ok());
    }

    #[tokio::test]
    async fn test_trigger_fires_once() {
        let signal = ShutdownSignal::new("任务分发器");
        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_listener_waits_until_triggered() {
        let signal = ShutdownSignal::new("编排引擎");
        let mut listener = signal.subscribe();
        let pending = tokio::time::timeout(Duration::from_millis(50), listener.recv()).await;
        assert!(pending.is_err());
    }
}
