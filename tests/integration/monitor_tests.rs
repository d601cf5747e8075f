use super::*;
use slot_locker::monitor::{MonitorExit, MonitorSettings};
use slot_locker::{GridScanner, Monitor, ReservationLocker, Shutdown};
use tokio::task::JoinHandle;

fn fast_settings(interval: Duration, test_mode: bool) -> MonitorSettings {
    MonitorSettings {
        reload_settle: Duration::ZERO,
        ..MonitorSettings::new(interval, test_mode)
    }
}

fn start(
    page: &FakePage,
    notifier: &Arc<RecordingNotifier>,
    settings: MonitorSettings,
    shutdown: &Shutdown,
) -> JoinHandle<MonitorExit> {
    let mut monitor = Monitor::new(
        Box::new(page.clone()),
        Arc::clone(notifier) as Arc<dyn Notifier>,
        GridScanner::new(vec!["普通車ＡＭ".to_string()]),
        ReservationLocker::with_timings(instant_timings()),
        settings,
        shutdown.clone(),
    );
    tokio::spawn(async move { monitor.run().await })
}

async fn stop(shutdown: &Shutdown, handle: JoinHandle<MonitorExit>) -> MonitorExit {
    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("monitor should stop promptly")
        .expect("monitor task panicked")
}

fn open_slot_site() -> FakePage {
    booking_site(
        grid_page(true, &[("普通車ＡＭ", "xoxxx")]),
        time_page(&[(true, "reserveTimeCheck_2_6", "08:30")], SUBMIT_PRIMARY),
        explanation_page(AGREE_PRIMARY),
    )
}

#[tokio::test]
async fn test_scenario_c_lock_then_idle_until_stopped() {
    let page = open_slot_site();
    let notifier = Arc::new(RecordingNotifier::default());
    let shutdown = Shutdown::new();
    let handle = start(&page, &notifier, fast_settings(Duration::from_millis(10), false), &shutdown);

    eventually("lock notification", || !notifier.messages().is_empty()).await;
    let reads = page.content_reads();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Nothing touches the page while the reservation is held.
    assert_eq!(page.content_reads(), reads);
    assert_eq!(page.reloads(), 0);
    assert_eq!(page.current(), MAIL_URL);
    assert!(!handle.is_finished());

    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("予約ロック成功"));
    assert!(messages[0].contains("08:30"));

    match stop(&shutdown, handle).await {
        MonitorExit::Locked(outcome) => {
            assert!(outcome.success);
            assert_eq!(outcome.category, "普通車ＡＭ");
            assert_eq!(outcome.date, "01/20 (Tue)");
        }
        other => panic!("expected a locked exit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_notification_failure_does_not_undo_lock() {
    let page = open_slot_site();
    let notifier = Arc::new(RecordingNotifier::failing());
    let shutdown = Shutdown::new();
    let handle = start(&page, &notifier, fast_settings(Duration::from_millis(10), false), &shutdown);

    eventually("notification attempt", || !notifier.messages().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(page.reloads(), 0);

    assert!(matches!(stop(&shutdown, handle).await, MonitorExit::Locked(_)));
}

#[tokio::test]
async fn test_scenario_d_failed_lock_resumes_polling() {
    let page = booking_site(
        grid_page(true, &[("普通車ＡＭ", "xoxxx")]),
        time_page(&[(true, "reserveTimeCheck_2_6", "08:30")], ""),
        explanation_page(AGREE_PRIMARY),
    );
    let notifier = Arc::new(RecordingNotifier::default());
    let shutdown = Shutdown::new();
    let handle = start(&page, &notifier, fast_settings(Duration::from_millis(10), true), &shutdown);

    eventually("failure notification", || !notifier.messages().is_empty()).await;
    eventually("polling to resume", || page.reloads() >= 2).await;

    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("[TEST MODE]\n"));
    assert!(messages[0].contains("予約失敗"));
    assert!(messages[0].contains("Booking failed at time selection"));

    assert_eq!(stop(&shutdown, handle).await, MonitorExit::Stopped);
}

#[tokio::test]
async fn test_reload_failures_do_not_end_the_loop() {
    // Empty grid first; the slot only shows up on a later version of the page.
    let page = booking_site(
        grid_page(true, &[("普通車ＡＭ", "xxxxx")]),
        time_page(&[(true, "reserveTimeCheck_2_6", "08:30")], SUBMIT_PRIMARY),
        explanation_page(AGREE_PRIMARY),
    )
    .with_page(GRID_URL, grid_page(true, &[("普通車ＡＭ", "xoxxx")]))
    .failing_reloads(2);
    let notifier = Arc::new(RecordingNotifier::default());
    let shutdown = Shutdown::new();
    let handle = start(&page, &notifier, fast_settings(Duration::from_millis(10), false), &shutdown);

    eventually("lock after reload errors", || !notifier.messages().is_empty()).await;
    assert_eq!(page.reloads(), 3);
    assert!(notifier.messages()[0].contains("予約ロック成功"));

    assert!(matches!(stop(&shutdown, handle).await, MonitorExit::Locked(_)));
}

#[tokio::test]
async fn test_stop_interrupts_long_interval() {
    let page = FakePage::new(GRID_URL).with_page(GRID_URL, grid_page(true, &[("普通車ＡＭ", "xxxxx")]));
    let notifier = Arc::new(RecordingNotifier::default());
    let shutdown = Shutdown::new();
    let handle = start(&page, &notifier, fast_settings(Duration::from_secs(3600), false), &shutdown);

    eventually("first scan", || page.content_reads() >= 1).await;

    assert_eq!(stop(&shutdown, handle).await, MonitorExit::Stopped);
    assert_eq!(page.reloads(), 0);
    assert!(notifier.messages().is_empty());
}

#[tokio::test]
async fn test_already_stopped_monitor_never_scans() {
    let page = open_slot_site();
    let notifier = Arc::new(RecordingNotifier::default());
    let shutdown = Shutdown::new();
    shutdown.trigger();

    let handle = start(&page, &notifier, fast_settings(Duration::from_millis(10), false), &shutdown);

    assert_eq!(stop(&shutdown, handle).await, MonitorExit::Stopped);
    assert_eq!(page.content_reads(), 0);
    assert!(page.clicks().is_empty());
}
