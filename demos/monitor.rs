//! Connect to an amplifier and print every state change.
//!
//! ```text
//! cargo run --example monitor -- 192.168.1.50 [port]
//! ```
//!
//! Set `MONITOR_DEBUG=1` to log frame traffic.

use matrio_control::{ClientConfig, ConnectionEvent, MatrioClient, StateUpdate, DEFAULT_PORT};
use tracing::Level;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let level = if std::env::var_os("MONITOR_DEBUG").is_some() {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut args = std::env::args().skip(1);
    let Some(host) = args.next() else {
        eprintln!("usage: monitor <host> [port]");
        std::process::exit(2);
    };
    let port = match args.next() {
        Some(p) => p.parse()?,
        None => DEFAULT_PORT,
    };

    let client = MatrioClient::start(ClientConfig::new(host).with_port(port));
    let mut connection = client.subscribe_connection();
    let mut updates = client.subscribe_state();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = connection.recv() => match event? {
                ConnectionEvent::State(state) => println!("connection: {}", state),
                ConnectionEvent::Fault { attempts, reason } => {
                    println!("device unreachable after {} attempts: {}", attempts, reason);
                }
            },
            update = updates.recv() => match update? {
                StateUpdate::Zone(change) => {
                    let snapshot = client.current_state();
                    if let Some(zone) = snapshot.zone(change.zone) {
                        let json = serde_json::to_string(zone)?;
                        println!("zone {} ({:?}): {}", change.zone, change.fields, json);
                    }
                }
                StateUpdate::Staleness(false) => {
                    println!("{}", serde_json::to_string_pretty(&client.current_state())?);
                }
                other => println!("{:?}", other),
            },
        }
    }

    client.shutdown().await;
    Ok(())
}
