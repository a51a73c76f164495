use std::{sync::Arc, time::Duration};

use rand::Rng;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::{
    ChangeFeed, RealtimeSubscriber, Subscription, SubscriptionCallback, SubscriptionEvent,
};
use crate::{models::StatusPayload, settings::RealtimeSettings};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Keeps one subscription per booking alive over an unreliable [`ChangeFeed`].
///
/// Connection errors and dropped streams are retried with exponential
/// backoff. After `max_retries` consecutive failures the callback receives a
/// single soft error and the adapter cools down before trying again.
pub struct RealtimeAdapter<F: ChangeFeed> {
    feed: Arc<F>,
    settings: RealtimeSettings,
}

impl<F: ChangeFeed> Clone for RealtimeAdapter<F> {
    fn clone(&self) -> Self {
        Self {
            feed: self.feed.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<F: ChangeFeed> RealtimeAdapter<F> {
    pub fn new(feed: Arc<F>, settings: RealtimeSettings) -> Self {
        Self { feed, settings }
    }

    pub fn feed(&self) -> &Arc<F> {
        &self.feed
    }
}

impl<F: ChangeFeed> RealtimeSubscriber for RealtimeAdapter<F> {
    fn subscribe(&self, booking_id: &str, callback: SubscriptionCallback) -> Subscription {
        let cancel_token = CancellationToken::new();
        tokio::spawn(subscription_loop(
            self.feed.clone(),
            booking_id.to_string(),
            callback,
            self.settings.clone(),
            cancel_token.clone(),
        ));
        Subscription::new(booking_id, cancel_token)
    }
}

fn jittered(backoff: Duration) -> Duration {
    let spread = (backoff.as_millis() as u64 / 4).max(1);
    backoff + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

/// Sleeps unless cancelled first. Returns `false` on cancellation.
async fn pause(duration: Duration, cancel_token: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel_token.cancelled() => false,
        _ = time::sleep(duration) => true,
    }
}

async fn subscription_loop<F: ChangeFeed>(
    feed: Arc<F>,
    booking_id: String,
    callback: SubscriptionCallback,
    settings: RealtimeSettings,
    cancel_token: CancellationToken,
) {
    let initial_backoff = Duration::from_millis(settings.initial_backoff_ms);
    let max_backoff = Duration::from_millis(settings.max_backoff_ms.max(settings.initial_backoff_ms));
    let mut backoff = initial_backoff;
    let mut consecutive_failures: u32 = 0;

    loop {
        if consecutive_failures >= settings.max_retries.max(1) {
            log_warn!(
                "realtime subscription for {} failed {} times; cooling down for {}ms",
                booking_id,
                consecutive_failures,
                settings.cooldown_ms
            );
            callback(SubscriptionEvent::Error(format!(
                "subscription for {booking_id} unavailable after {consecutive_failures} attempts"
            )));
            if !pause(Duration::from_millis(settings.cooldown_ms), &cancel_token).await {
                break;
            }
            consecutive_failures = 0;
            backoff = initial_backoff;
        }

        let connected = tokio::select! {
            _ = cancel_token.cancelled() => break,
            result = feed.connect(&booking_id) => result,
        };

        match connected {
            Ok(mut stream) => {
                log_info!("realtime subscription established for {}", booking_id);
                let mut delivered_any = false;

                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel_token.cancelled() => None,
                        document = stream.recv() => Some(document),
                    };

                    match next {
                        None => {
                            log_debug!("realtime subscription for {} closed", booking_id);
                            return;
                        }
                        Some(Some(document)) => {
                            delivered_any = true;
                            match StatusPayload::from_document(document) {
                                Ok(payload) => callback(SubscriptionEvent::Update(payload)),
                                Err(err) => {
                                    log_warn!("dropping malformed change for {}: {err}", booking_id)
                                }
                            }
                        }
                        Some(None) => break,
                    }
                }

                // A stream that carried traffic was healthy; start the count over.
                if delivered_any {
                    consecutive_failures = 0;
                    backoff = initial_backoff;
                }
                consecutive_failures += 1;
                log_warn!("realtime stream for {} dropped; reconnecting", booking_id);
            }
            Err(err) => {
                consecutive_failures += 1;
                log_warn!(
                    "realtime connect for {} failed ({}/{}): {err:?}",
                    booking_id,
                    consecutive_failures,
                    settings.max_retries
                );
            }
        }

        if !pause(jittered(backoff), &cancel_token).await {
            break;
        }
        backoff = (backoff * 2).min(max_backoff);
    }

    log_debug!("realtime subscription loop for {} finished", booking_id);
}
