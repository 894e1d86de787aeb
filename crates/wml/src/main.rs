use wml_core::{config::Config, store::PersistenceStore};

/// Query side of the listener for out-of-process pollers: prints the full
/// unread-message log as JSON. The listener itself runs in the host that
/// supplies a transport adapter and drives `Listener::start`.
fn main() -> anyhow::Result<()> {
    wml_core::logging::init("wml")?;
    let cfg = Config::load()?;

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("unread") | None => {
            let snapshot = PersistenceStore::new(&cfg.messages_file).read_all();
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        Some(other) => {
            eprintln!("unknown command: {other}");
            eprintln!("usage: wml [unread]");
            std::process::exit(2);
        }
    }
}
