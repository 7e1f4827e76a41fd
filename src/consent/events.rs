use tokio::sync::broadcast;

use crate::consent::preferences::CookiePreferences;

/// A handle for receiving consent events.
pub type EventSubscription = broadcast::Receiver<ConsentEvent>;

/// Events raised towards collaborators (analytics loaders, pixels, UI).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentEvent {
    /// Preferences changed; carries the full new preferences.
    PreferencesChanged(CookiePreferences),
    /// Snapshot for analytics initialisation. Only raised while analytics is allowed.
    ConsentAnalytics {
        preferences: CookiePreferences,
        timestamp: i64,
    },
    /// Analytics flipped from refused to allowed.
    AnalyticsEnabled,
    /// Analytics flipped from allowed to refused.
    AnalyticsDisabled,
}

impl ConsentEvent {
    /// Event name as seen by page scripts.
    pub fn name(&self) -> &'static str {
        match self {
            ConsentEvent::PreferencesChanged(_) => "cookie-preferences-changed",
            ConsentEvent::ConsentAnalytics { .. } => "cookie-consent-analytics",
            ConsentEvent::AnalyticsEnabled => "analytics-enabled",
            ConsentEvent::AnalyticsDisabled => "analytics-disabled",
        }
    }

    /// Events that follow a change from `before` to `after`, in dispatch order.
    pub fn for_change(before: &CookiePreferences, after: &CookiePreferences, timestamp: i64) -> Vec<ConsentEvent> {
        let mut events = vec![ConsentEvent::PreferencesChanged(after.clone())];
        if after.analytics() {
            events.push(ConsentEvent::ConsentAnalytics {
                preferences: after.clone(),
                timestamp,
            });
        }
        match (before.analytics(), after.analytics()) {
            (false, true) => events.push(ConsentEvent::AnalyticsEnabled),
            (true, false) => events.push(ConsentEvent::AnalyticsDisabled),
            _ => {}
        }
        events
    }
}

#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ConsentEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.tx.subscribe()
    }

    pub fn publish(&self, ev: ConsentEvent) {
        log::debug!("consent event: {}", ev.name());
        // send() only fails when nobody is subscribed
        let _ = self.tx.send(ev);
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
