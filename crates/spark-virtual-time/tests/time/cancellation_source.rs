pub mod cancellation_source {
    //! 超时取消源测试：验证超时边界、手动取消与释放语义。
    //!
    //! # 测试目标（Why）
    //! - 超时为 T 的取消源在累计推进小于 T 时保持未取消，达到 T 时立即取消；
    //! - 手动取消与超时取消互不干扰，已取消后 `cancel_after` 为无操作；
    //! - 释放后的取消源拒绝一切操作。

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use spark_virtual_time::{TimeError, VirtualCancellationSource, VirtualClock};

    fn minutes(value: u64) -> Duration {
        Duration::from_secs(value * 60)
    }

    #[test]
    fn not_cancelled_before_timeout() {
        let clock = VirtualClock::new();
        let source = clock
            .create_cancellation_source(minutes(10))
            .expect("合法超时");
        assert!(!source.is_cancellation_requested());

        clock.advance_time(minutes(5));
        assert!(!source.is_cancellation_requested());
    }

    #[test]
    fn cancelled_once_timeout_is_crossed() {
        let clock = VirtualClock::new();
        let source = clock
            .create_cancellation_source(minutes(10))
            .expect("合法超时");

        clock.advance_time(minutes(5));
        clock.advance_time(minutes(6));
        assert!(source.is_cancellation_requested());
    }

    #[test]
    fn boundary_instant_triggers_cancellation() {
        let clock = VirtualClock::new();
        let source = clock
            .create_cancellation_source(minutes(10))
            .expect("合法超时");

        clock.advance_time(minutes(10) - Duration::from_millis(1));
        assert!(!source.is_cancellation_requested());
        clock.advance_time(Duration::from_millis(1));
        assert!(source.is_cancellation_requested());
    }

    #[test]
    fn manual_cancel_then_advance_stays_cancelled() {
        let clock = VirtualClock::new();
        let source = clock
            .create_cancellation_source(minutes(10))
            .expect("合法超时");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _registration = source.token().register(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        source.cancel().expect("首次取消");
        clock.advance_time(minutes(11));

        assert!(source.is_cancellation_requested());
        assert_eq!(hits.load(Ordering::SeqCst), 1, "回调恰好执行一次");
    }

    #[test]
    fn cancel_after_on_cancelled_source_is_no_op() {
        let clock = VirtualClock::new();
        let source = VirtualCancellationSource::new(clock.clone());
        source.cancel().expect("取消");

        assert_eq!(source.cancel_after(minutes(1)), Ok(()));
        assert_eq!(clock.active_timer_count(), 0);
    }

    #[test]
    fn cancel_after_on_disposed_source_fails() {
        let clock = VirtualClock::new();
        let source = VirtualCancellationSource::new(clock.clone());
        source.dispose();

        assert_eq!(
            source.cancel_after(minutes(5)),
            Err(TimeError::ObjectDisposed {
                object: "VirtualCancellationSource"
            })
        );
        assert!(source.cancel().is_err());
    }

    #[test]
    fn source_without_timeout_waits_for_first_cancel_after() {
        let clock = VirtualClock::new();
        let source = VirtualCancellationSource::new(clock.clone());
        clock.advance_time(minutes(60));
        assert!(!source.is_cancellation_requested());
        assert_eq!(clock.active_timer_count(), 0, "尚未安排超时，不应创建定时器");

        source.cancel_after(minutes(1)).expect("合法超时");
        clock.advance_time(minutes(1));
        assert!(source.is_cancellation_requested());
    }

    /// 取消回调在推进线程上同步执行，可在其中创建新的取消源并立即安排超时。
    #[test]
    fn cancellation_callback_may_schedule_follow_up_timeout() {
        let clock = VirtualClock::new();
        let first = clock
            .create_cancellation_source(minutes(1))
            .expect("合法超时");
        let follow_up = Arc::new(VirtualCancellationSource::new(clock.clone()));
        let _registration = {
            let follow_up = Arc::clone(&follow_up);
            first.token().register(move || {
                follow_up.cancel_after(minutes(1)).expect("合法超时");
            })
        };

        clock.advance_time(minutes(2));
        assert!(first.is_cancellation_requested());
        assert!(
            follow_up.is_cancellation_requested(),
            "后续超时在同一次推进内到期"
        );
    }
}
