//! 测试辅助工具

use std::time::Duration;

use tokio::time::sleep;

pub struct TestEnv;

impl TestEnv {
    /// 在超时时间内等待条件成立
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        Self::wait_for_with_interval(&mut condition, timeout, Duration::from_millis(10)).await
    }

    pub async fn wait_for_with_interval<F, Fut>(
        mut condition: F,
        timeout: Duration,
        poll_interval: Duration,
    ) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(poll_interval).await;
        }

        condition().await
    }
}

pub struct TestAssertions;

impl TestAssertions {
    /// 集合包含且只包含期望的元素，与顺序无关
    pub fn assert_contains_exactly<T: PartialEq + std::fmt::Debug>(actual: &[T], expected: &[T]) {
        assert_eq!(
            actual.len(),
            expected.len(),
            "集合长度不同。实际: {actual:?}, 期望: {expected:?}"
        );

        for expected_item in expected {
            assert!(
                actual.contains(expected_item),
                "期望的元素 {expected_item:?} 不在实际集合 {actual:?} 中"
            );
        }
    }

    pub fn assert_all<T, P>(items: &[T], predicate: P, message: &str)
    where
        P: Fn(&T) -> bool,
        T: std::fmt::Debug,
    {
        for item in items {
            assert!(predicate(item), "{message}: 元素 {item:?} 不满足条件");
        }
    }
}

pub struct IntegrationTestSetup;

impl IntegrationTestSetup {
    /// 初始化测试日志，每个测试二进制调用一次即可
    pub fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init();
    }
}
