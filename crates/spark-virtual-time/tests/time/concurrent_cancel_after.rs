pub mod concurrent_cancel_after {
    //! 并发 `cancel_after` 测试：首次创建定时器的竞争只能产生一个活跃定时器。
    //!
    //! # 测试目标（Why）
    //! - 取消源懒创建内部定时器，多个线程同时首次调用 `cancel_after` 时由 CAS 决出胜者，
    //!   落败方必须释放多建的定时器，否则时钟中会残留永不触发取消的孤儿定时器；
    //! - 手动取消可以与推进线程并发发生，取消状态必须对推进线程可见。
    //!
    //! # 执行步骤（How）
    //! 1. 以 `Barrier` 让多个线程同时调用 `cancel_after`；
    //! 2. 汇合后断言时钟中只剩一个活跃定时器，推进到超时后取消源被取消且定时器被释放。

    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    use spark_virtual_time::{VirtualCancellationSource, VirtualClock};

    const THREADS: usize = 8;

    #[test]
    fn racing_first_cancel_after_installs_single_timer() {
        for _ in 0..32 {
            let clock = VirtualClock::new();
            let source = Arc::new(VirtualCancellationSource::new(clock.clone()));
            let barrier = Arc::new(Barrier::new(THREADS));

            let workers: Vec<_> = (0..THREADS)
                .map(|_| {
                    let source = Arc::clone(&source);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        source
                            .cancel_after(Duration::from_secs(30))
                            .expect("合法超时");
                    })
                })
                .collect();
            for worker in workers {
                worker.join().expect("工作线程不应 panic");
            }

            assert_eq!(clock.active_timer_count(), 1, "竞争落败方必须释放多建的定时器");
            clock.advance_time(Duration::from_secs(30));
            assert!(source.is_cancellation_requested());
            assert_eq!(clock.active_timer_count(), 0);
        }
    }

    #[test]
    fn cancel_from_another_thread_is_visible_to_driver() {
        let clock = VirtualClock::new();
        let source = Arc::new(
            clock
                .create_cancellation_source(Duration::from_secs(3600))
                .expect("合法超时"),
        );
        let delay = clock.create_delay(Duration::from_secs(10), &source.token());

        let remote = Arc::clone(&source);
        thread::spawn(move || remote.cancel().expect("首次取消"))
            .join()
            .expect("取消线程不应 panic");

        assert!(source.is_cancellation_requested());
        assert!(delay.is_cancelled());
        assert_eq!(clock.active_timer_count(), 0);
        assert_eq!(clock.active_delay_count(), 0);
    }
}
