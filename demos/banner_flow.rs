use krim_consent::clock::SystemClock;
use krim_consent::storage::{JsonFileArea, StorageArea};
use krim_consent::{
    ConsentConfig, ConsentError, ConsentEvent, ConsentFacade, ConsentStore, PreferencesPatch,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), ConsentError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    // Persistent storage lives in a JSON file, standing in for the browser's localStorage.
    let path = std::env::temp_dir().join("krim-consent-demo.json");
    let area: Arc<dyn StorageArea> = Arc::new(JsonFileArea::new(&path));

    let config = ConsentConfig::builder()
        .event_capacity(16)
        .build()?;

    let store = Arc::new(ConsentStore::with_clock(area.clone(), config.clone(), Arc::new(SystemClock))?);
    let consent = ConsentFacade::new(store);

    // Script loader: reacts to consent events the way the analytics bootstrap on the site does.
    let mut events = consent.subscribe_events();
    let loader = tokio::spawn(async move {
        while let Ok(ev) = events.recv().await {
            match ev {
                ConsentEvent::AnalyticsEnabled => println!("[loader] injecting analytics script"),
                ConsentEvent::AnalyticsDisabled => println!("[loader] removing analytics script"),
                ConsentEvent::ConsentAnalytics { timestamp, .. } => {
                    println!("[loader] analytics consent snapshot at {timestamp}")
                }
                ConsentEvent::PreferencesChanged(p) => println!("[loader] preferences now {p:?}"),
            }
        }
    });

    // Banner component keeps its subscription while mounted.
    let banner = consent.subscribe(|p| println!("[banner] re-render with {p:?}"));

    if consent.needs_consent() {
        println!("[banner] showing consent banner");
        for m in consent.categories() {
            let lock = if m.required { " (always on)" } else { "" };
            println!("  - {}{}: {}", m.name, lock, m.description);
        }
    }

    // Visitor opens the dialog and allows analytics only.
    consent.update_preferences(&PreferencesPatch::new().analytics(true))?;
    println!("snapshot: {:?}", consent.snapshot());

    // A second page load sees the stored choice.
    let reloaded = ConsentStore::new(area.clone(), config)?;
    println!("after reload: consented={} prefs={:?}", reloaded.has_consented(), reloaded.preferences());

    consent.reject_non_essential()?;
    consent.reset_consent()?;

    if let Some(notice) = consent.notice() {
        println!("[banner] {}", notice.message());
    }

    drop(banner);
    drop(consent);
    let _ = loader.await;
    let _ = std::fs::remove_file(&path);
    Ok(())
}
