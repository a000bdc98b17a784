use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info};

use mail_graph_module::MailProvider;

/// Graph subscriptions expire after at most three days; renewing daily
/// keeps a comfortable margin.
pub(super) const RENEWAL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub(super) struct RenewalControl {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RenewalControl {
    pub(super) fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Re-create the inbox change-notification subscription immediately and
/// then on a fixed schedule. Failures are logged and retried on the next
/// tick; the webhook keeps working on the previous subscription meanwhile.
pub(super) fn spawn_subscription_renewal(
    mail: Arc<dyn MailProvider>,
    webhook_url: String,
    interval: Duration,
) -> RenewalControl {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::spawn(move || {
        while !stop_flag.load(Ordering::SeqCst) {
            match mail.create_subscription(&webhook_url) {
                Ok(()) => info!("graph subscription renewed -> {}", webhook_url),
                Err(err) => error!("graph subscription renewal failed: {}", err),
            }
            sleep_interruptible(&stop_flag, interval);
        }
    });

    RenewalControl {
        stop,
        handle: Some(handle),
    }
}

fn sleep_interruptible(stop: &AtomicBool, total: Duration) {
    let slice = Duration::from_millis(250).min(total);
    let mut remaining = total;
    while remaining > Duration::ZERO && !stop.load(Ordering::SeqCst) {
        let nap = slice.min(remaining);
        thread::sleep(nap);
        remaining = remaining.saturating_sub(nap);
    }
}
