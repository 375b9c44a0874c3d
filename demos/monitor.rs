use luxtherm::{EntryData, Integration};
use std::env;

#[tokio::main]
async fn main() -> luxtherm::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let path = args.get(1).expect("usage: monitor <entry.json>");
    let entry: EntryData = serde_json::from_str(&std::fs::read_to_string(path)?)?;

    println!("Setting up {} ({})...", entry.name, entry.device_id);
    let integration = Integration::from_entry(entry).await?;

    let coordinator = integration.coordinator();
    coordinator.subscribe(|state| {
        println!(
            "[{}] {:.1}\u{00b0}F | target: {:.1}\u{00b0}F | mode: {}",
            state.name, state.current_temperature, state.target_temperature, state.hvac_mode,
        );
    });
    coordinator.subscribe_events(|event| println!("{event:?}"));
    coordinator.subscribe_failures(|e| eprintln!("Update failed: {e}"));

    println!(
        "Polling every {:?}. Ctrl-C to stop.",
        coordinator.update_interval()
    );
    tokio::signal::ctrl_c().await?;

    integration.unload();
    Ok(())
}
