pub mod example_workflow {
    //! 端到端示例：业务代码只依赖注入的时间能力，测试以虚拟时钟驱动整段流程。
    //!
    //! # 测试目标（Why）
    //! - 演示“定时器 + 超时取消源 + 延迟”组合的典型用法，确认整段流程无需任何真实等待；
    //! - 业务侧只持有 `Fn` 形式的能力（当前时间、创建定时器、延迟、创建取消源），与时钟实现解耦。
    //!
    //! # 执行步骤（How）
    //! 1. 在 `LocalPool` 上启动业务任务，推进到首个挂起点；
    //! 2. 推进 15s：定时器在 5s/10s/15s 触发，取消源在 10s 触发；
    //! 3. 让任务继续执行到延迟挂起点，再推进 5s 完成延迟。
    //!
    //! # 注意事项（Trade-offs）
    //! - Future 只在被轮询时继续执行，因此延迟从任务恢复的时刻（15s）开始计时，需要第二次推进；
    //!   取消时刻则由同步回调在推进线程上记录，保持为 10s；
    //! - 同一时刻的事件按实体创建顺序投递，业务定时器先于取消源内部定时器。

    use std::sync::Arc;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use futures::executor::LocalPool;
    use futures::task::LocalSpawnExt;
    use parking_lot::Mutex;
    use spark_virtual_time::{
        Cancellation, Delay, Result, VirtualCancellationSource, VirtualClock, VirtualTimer,
    };

    type UtcNow = Arc<dyn Fn() -> SystemTime + Send + Sync>;
    type CreateTimer = Arc<dyn Fn() -> VirtualTimer + Send + Sync>;
    type TaskDelay = Arc<dyn Fn(Duration, &Cancellation) -> Delay + Send + Sync>;
    type CreateCancellationSource =
        Arc<dyn Fn(Duration) -> Result<VirtualCancellationSource> + Send + Sync>;

    type Journal = Arc<Mutex<Vec<(&'static str, SystemTime)>>>;

    /// 只通过注入能力访问时间的业务组件。
    struct Example {
        journal: Journal,
        utc_now: UtcNow,
        create_timer: CreateTimer,
        task_delay: TaskDelay,
        create_cancellation_source: CreateCancellationSource,
    }

    impl Example {
        fn record(&self, event: &'static str) {
            self.journal.lock().push((event, (self.utc_now)()));
        }

        async fn execute(
            &self,
            timer_tick_period: Duration,
            cancellation_timeout: Duration,
            delay_timeout: Duration,
            cancellation: Cancellation,
        ) -> Result<()> {
            self.record("started");

            let timer = (self.create_timer)();
            timer.set_interval(timer_tick_period)?;
            {
                let journal = Arc::clone(&self.journal);
                let utc_now = Arc::clone(&self.utc_now);
                timer.on_elapsed(move |_| journal.lock().push(("timer elapsed", utc_now())));
            }
            timer.start()?;

            let source = (self.create_cancellation_source)(cancellation_timeout)?;
            let _registration = {
                let journal = Arc::clone(&self.journal);
                let utc_now = Arc::clone(&self.utc_now);
                source
                    .token()
                    .register(move || journal.lock().push(("cancellation requested", utc_now())))
            };
            source.token().cancelled().await;
            self.record("resumed after cancellation");

            (self.task_delay)(delay_timeout, &cancellation).await?;
            self.record("delay completed");

            timer.dispose();
            Ok(())
        }
    }

    fn wire(clock: &VirtualClock, journal: &Journal) -> Example {
        let now_clock = clock.clone();
        let timer_clock = clock.clone();
        let delay_clock = clock.clone();
        let source_clock = clock.clone();
        Example {
            journal: Arc::clone(journal),
            utc_now: Arc::new(move || now_clock.current_time()),
            create_timer: Arc::new(move || timer_clock.create_timer()),
            task_delay: Arc::new(move |duration: Duration, cancellation: &Cancellation| {
                delay_clock.create_delay(duration, cancellation)
            }),
            create_cancellation_source: Arc::new(move |timeout| {
                source_clock.create_cancellation_source(timeout)
            }),
        }
    }

    #[test]
    fn workflow_runs_without_real_waiting() {
        let start = UNIX_EPOCH + Duration::from_secs(1_640_995_200);
        let clock = VirtualClock::with_start(start);
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let example = wire(&clock, &journal);

        let mut pool = LocalPool::new();
        let handle = pool
            .spawner()
            .spawn_local_with_handle(async move {
                example
                    .execute(
                        Duration::from_secs(5),
                        Duration::from_secs(10),
                        Duration::from_secs(5),
                        Cancellation::new(),
                    )
                    .await
            })
            .expect("本地执行器可用");

        pool.run_until_stalled();
        clock.advance_time(Duration::from_secs(15));
        pool.run_until_stalled();
        clock.advance_time(Duration::from_secs(5));
        assert_eq!(pool.run_until(handle), Ok(()));

        let at = |secs: u64| start + Duration::from_secs(secs);
        assert_eq!(
            journal.lock().as_slice(),
            [
                ("started", at(0)),
                ("timer elapsed", at(5)),
                ("timer elapsed", at(10)),
                ("cancellation requested", at(10)),
                ("timer elapsed", at(15)),
                ("resumed after cancellation", at(15)),
                ("timer elapsed", at(20)),
                ("delay completed", at(20)),
            ]
        );
        assert_eq!(clock.active_timer_count(), 0, "流程结束时定时器已释放");
        assert_eq!(clock.active_delay_count(), 0);
    }

    #[test]
    fn caller_cancellation_aborts_the_final_delay() {
        let clock = VirtualClock::new();
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let example = wire(&clock, &journal);
        let caller = Cancellation::new();

        let mut pool = LocalPool::new();
        let token = caller.clone();
        let handle = pool
            .spawner()
            .spawn_local_with_handle(async move {
                example
                    .execute(
                        Duration::from_secs(1),
                        Duration::from_secs(2),
                        Duration::from_secs(60),
                        token,
                    )
                    .await
            })
            .expect("本地执行器可用");

        pool.run_until_stalled();
        clock.advance_time(Duration::from_secs(2));
        pool.run_until_stalled();
        caller.cancel();

        let err = pool.run_until(handle).unwrap_err();
        assert!(err.is_cancelled());
        assert!(
            !journal
                .lock()
                .iter()
                .any(|(event, _)| *event == "delay completed")
        );
    }
}
