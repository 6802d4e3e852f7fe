#[cfg(test)]
mod tests {
    use crate::bus::{Bus, ControlBus};
    use crate::config::ControlConfig;
    use crate::error::{RecvError, TransportFailReason};
    use crate::io::Discipline;
    use crate::runtime::{AsyncRuntime, Executor, ThreadPolicy};
    use crate::utils::*;
    use crossbeam::channel::{Receiver, unbounded};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::{Duration, Instant};

    fn fast_control() -> ControlConfig {
        ControlConfig {
            poll_timeout_ms: 10,
            ..ControlConfig::default()
        }
    }

    // ---- helper: publish until `rx` yields `expect`, tolerating the slow joiner
    fn publish_until_seen(
        bus: &ControlBus,
        endpoint: &str,
        expect: &str,
        rx: &Receiver<String>,
        dur: Duration,
    ) -> bool {
        let start = Instant::now();
        while start.elapsed() < dur {
            bus.publish(endpoint, expect).expect("publish failed");
            if let Ok(msg) = rx.recv_timeout(Duration::from_millis(20))
                && msg == expect
            {
                return true;
            }
        }
        false
    }

    // ---- helper: skip older messages until `expect` shows up
    fn wait_for(rx: &Receiver<String>, expect: &str, dur: Duration) -> bool {
        let start = Instant::now();
        while let Some(left) = dur.checked_sub(start.elapsed()) {
            match rx.recv_timeout(left) {
                Ok(msg) if msg == expect => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
        false
    }

    fn free_tcp_port() -> u16 {
        let l = TcpListener::bind("127.0.0.1:0").expect("probe bind failed");
        l.local_addr().expect("probe addr failed").port()
    }

    #[test]
    fn fifo_subscribers_see_every_payload_in_order() {
        let bus = Bus::default();
        let queues: Vec<_> = (0..3)
            .map(|_| {
                bus.subscribe_stream::<u32>("md", Discipline::ReliableFifo)
                    .expect("subscribe failed")
            })
            .collect();

        for i in 0..50u32 {
            assert_eq!(bus.publish_stream("md", Arc::new(i)), 3);
        }

        for q in &queues {
            let got: Vec<u32> = q.drain(usize::MAX).into_iter().map(|v| *v).collect();
            assert_eq!(got, (0..50).collect::<Vec<_>>());
        }
    }

    #[test]
    fn latest_subscriber_sees_only_last_payload() {
        let bus = Bus::default();
        let latest = bus
            .subscribe_stream::<u32>("md", Discipline::RealtimeLatest)
            .expect("subscribe failed");
        let token = CancelToken::new_root();

        assert_eq!(
            latest.recv(&token, Some(Duration::from_millis(5))),
            Err(RecvError::Timeout)
        );

        for i in 1..=10u32 {
            bus.publish_stream("md", Arc::new(i));
        }
        assert_eq!(latest.try_pop().map(|v| *v), Some(10));
        assert!(latest.try_pop().is_none());
    }

    #[test]
    fn no_ghost_delivery() {
        let bus = Bus::default();
        assert_eq!(bus.publish_stream("late", Arc::new(1u8)), 0);

        let q = bus
            .subscribe_stream::<u8>("late", Discipline::ReliableFifo)
            .expect("subscribe failed");
        assert!(q.is_empty());

        bus.publish_stream("late", Arc::new(2u8));
        assert_eq!(q.try_pop().map(|v| *v), Some(2));
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn concurrent_first_publish_binds_once() {
        let bus = Arc::new(ControlBus::new(fast_control()));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let bus = bus.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    bus.publish("inproc://race", &format!("m{i}"))
                })
            })
            .collect();

        // A second bind of the same name would fail with AddrInUse.
        for h in handles {
            h.join().expect("publisher thread panicked").expect("publish failed");
        }
        assert!(bus.is_bound("inproc://race"));
    }

    #[test]
    fn two_callbacks_on_one_endpoint_both_receive() {
        let bus = ControlBus::new(fast_control());
        bus.publish("inproc://status", "warmup").expect("warmup failed");

        let (tx_a, rx_a) = unbounded();
        let (tx_b, rx_b) = unbounded();
        bus.subscribe("inproc://status", move |m| {
            let _ = tx_a.send(m.to_owned());
        })
        .expect("subscribe a failed");
        bus.subscribe("inproc://status", move |m| {
            let _ = tx_b.send(m.to_owned());
        })
        .expect("subscribe b failed");

        assert!(publish_until_seen(&bus, "inproc://status", "ready", &rx_a, Duration::from_secs(2)));
        assert!(wait_for(&rx_b, "ready", Duration::from_secs(1)));

        bus.publish("inproc://status", "next").expect("publish failed");
        assert!(wait_for(&rx_a, "next", Duration::from_secs(1)));
        assert!(wait_for(&rx_b, "next", Duration::from_secs(1)));
        bus.shutdown();
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let bus = ControlBus::new(fast_control());
        bus.publish("inproc://order", "warmup").expect("warmup failed");

        let (tx, rx) = unbounded();
        for tag in ["first", "second", "third"] {
            let tx = tx.clone();
            bus.subscribe("inproc://order", move |m| {
                if m == "go" {
                    let _ = tx.send(tag.to_string());
                }
            })
            .expect("subscribe failed");
        }

        let mut first = None;
        let start = Instant::now();
        while first.is_none() && start.elapsed() < Duration::from_secs(2) {
            bus.publish("inproc://order", "go").expect("publish failed");
            first = rx.recv_timeout(Duration::from_millis(20)).ok();
        }
        assert_eq!(first.as_deref(), Some("first"));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).expect("second missing"), "second");
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).expect("third missing"), "third");
    }

    #[test]
    fn tcp_round_trip_through_bus() {
        let endpoint = format!("tcp://127.0.0.1:{}", free_tcp_port());
        let server = ControlBus::new(fast_control());
        let client = ControlBus::new(fast_control());

        // tcp allows connecting before the publisher exists.
        let (tx, rx) = unbounded();
        client
            .subscribe(&endpoint, move |m| {
                let _ = tx.send(m.to_owned());
            })
            .expect("subscribe failed");

        assert!(publish_until_seen(&server, &endpoint, "hello", &rx, Duration::from_secs(5)));
        client.shutdown();
        server.shutdown();
    }

    #[test]
    fn shutdown_from_callback_does_not_deadlock() {
        let bus = Arc::new(ControlBus::new(fast_control()));
        bus.publish("inproc://bye", "warmup").expect("warmup failed");

        let (tx, rx) = unbounded();
        let weak = Arc::downgrade(&bus);
        bus.subscribe("inproc://bye", move |_| {
            if let Some(bus) = weak.upgrade() {
                bus.shutdown();
                let _ = tx.send(());
            }
        })
        .expect("subscribe failed");

        let start = Instant::now();
        let mut done = false;
        while !done && start.elapsed() < Duration::from_secs(2) {
            let _ = bus.publish("inproc://bye", "stop");
            done = rx.recv_timeout(Duration::from_millis(20)).is_ok();
        }
        assert!(done);
        assert_eq!(bus.worker_count(), 0);
    }

    #[test]
    fn critical_loop_consumes_data_plane_until_stop() {
        let rt = AsyncRuntime::new();
        rt.init(None, 1, 1).expect("runtime init failed");
        let bus = Arc::new(Bus::default());
        let q = bus
            .subscribe_stream::<u64>("ticks", Discipline::ReliableFifo)
            .expect("subscribe failed");

        let consumed = Arc::new(AtomicUsize::new(0));
        let c = consumed.clone();
        rt.spawn_critical_loop(ThreadPolicy::default(), move |stop| {
            loop {
                match q.recv(&stop, Some(Duration::from_millis(50))) {
                    Ok(_) => {
                        c.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(RecvError::Timeout) => continue,
                    Err(RecvError::Cancelled) => break,
                }
            }
        })
        .expect("spawn failed");

        for i in 0..100u64 {
            bus.publish_stream("ticks", Arc::new(i));
        }
        let start = Instant::now();
        while consumed.load(Ordering::SeqCst) < 100 && start.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(consumed.load(Ordering::SeqCst), 100);

        let stopped_at = Instant::now();
        rt.stop();
        assert!(stopped_at.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn io_pool_drives_control_publishes() {
        let rt = AsyncRuntime::new();
        rt.init(None, 2, 1).expect("runtime init failed");
        let bus = Arc::new(ControlBus::new(fast_control()));
        bus.publish("inproc://jobs", "warmup").expect("warmup failed");

        let (tx, rx) = unbounded();
        bus.subscribe("inproc://jobs", move |m| {
            let _ = tx.send(m.to_owned());
        })
        .expect("subscribe failed");

        let strand = rt.create_io_strand().expect("strand failed");
        let start = Instant::now();
        let mut seen = false;
        while !seen && start.elapsed() < Duration::from_secs(2) {
            let bus = bus.clone();
            strand.post(move || {
                let _ = bus.publish("inproc://jobs", "from-io");
            });
            seen = rx.recv_timeout(Duration::from_millis(20)).is_ok_and(|m| m == "from-io");
        }
        assert!(seen);
        rt.stop();
    }

    #[test]
    fn control_shutdown_races_publishers_and_callbacks() {
        let bus = Arc::new(ControlBus::new(fast_control()));
        bus.publish("inproc://storm", "warmup").expect("warmup failed");

        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        bus.subscribe("inproc://storm", move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        })
        .expect("subscribe failed");

        let running = Arc::new(AtomicBool::new(true));
        let (res_tx, res_rx) = unbounded();
        let publishers: Vec<_> = (0..4)
            .map(|i| {
                let (bus, running, res_tx) = (bus.clone(), running.clone(), res_tx.clone());
                thread::spawn(move || {
                    let mut unexpected = Vec::new();
                    while running.load(Ordering::SeqCst) {
                        match bus.publish("inproc://storm", &format!("p{i}")) {
                            Ok(()) => {}
                            Err(e) if e.reason() == TransportFailReason::Closed => {}
                            Err(e) => unexpected.push(e.reason()),
                        }
                    }
                    let _ = res_tx.send(unexpected);
                })
            })
            .collect();

        let start = Instant::now();
        while seen.load(Ordering::SeqCst) == 0 && start.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(seen.load(Ordering::SeqCst) > 0);

        let (done_tx, done_rx) = unbounded();
        let b = bus.clone();
        thread::spawn(move || {
            b.shutdown();
            let _ = done_tx.send(());
        });
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("shutdown did not return");

        running.store(false, Ordering::SeqCst);
        for _ in 0..4 {
            let unexpected = res_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("publisher did not return");
            assert!(unexpected.is_empty(), "{unexpected:?}");
        }
        for h in publishers {
            h.join().expect("publisher thread panicked");
        }
        bus.shutdown();
    }

    #[test]
    fn runtime_stop_races_posts_and_strand_posts() {
        let rt = Arc::new(AsyncRuntime::new());
        rt.init(None, 2, 2).expect("runtime init failed");
        let strand = rt.create_io_strand().expect("strand failed");

        let ran = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = unbounded();
        let posters: Vec<_> = (0..4)
            .map(|i| {
                let (rt, strand, ran, running, done_tx) = (
                    rt.clone(),
                    strand.clone(),
                    ran.clone(),
                    running.clone(),
                    done_tx.clone(),
                );
                thread::spawn(move || {
                    while running.load(Ordering::SeqCst) {
                        let ran = ran.clone();
                        let job = move || {
                            ran.fetch_add(1, Ordering::SeqCst);
                        };
                        if i % 2 == 0 {
                            rt.post_io(job);
                        } else {
                            strand.post(job);
                        }
                    }
                    let _ = done_tx.send(());
                })
            })
            .collect();

        let start = Instant::now();
        while ran.load(Ordering::SeqCst) < 100 && start.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(ran.load(Ordering::SeqCst) >= 100);

        let (stopped_tx, stopped_rx) = unbounded();
        let r = rt.clone();
        thread::spawn(move || {
            r.stop();
            let _ = stopped_tx.send(());
        });
        stopped_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("stop did not return");
        assert!(!rt.is_running());

        running.store(false, Ordering::SeqCst);
        for _ in 0..4 {
            done_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("poster did not return");
        }
        for h in posters {
            h.join().expect("poster thread panicked");
        }
    }
}
