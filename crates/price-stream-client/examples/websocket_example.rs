/*
[INPUT]:  PRICE_STREAM_URL environment variable
[OUTPUT]: Live price updates printed for a few seconds
[POS]:    Examples - WebSocket stream handling
[UPDATE]: When the client API changes
*/

use price_stream_client::*;
use tokio::time::{Duration, sleep};

/// Example: subscribe to live prices for a short watchlist
///
/// Run with `PRICE_STREAM_URL=ws://localhost:8000/ws/prices`.
#[tokio::main]
async fn main() {
    println!("=== Price Stream WebSocket Example ===\n");

    let config = match StreamConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            return;
        }
    };

    let client = PriceStreamClient::new(config);
    println!("✓ Client created for {}", client.config().url);

    client.on_connection_change(|connected| {
        println!("  connection: {}", if connected { "live" } else { "offline" });
    });
    client.on_message(|update| {
        println!("  {} {} ({:?}%)", update.symbol, update.price, update.change_percent);
    });

    // Queued until the connection opens, then sent as one batch.
    client.subscribe(["aapl", "msft", "tsla"]);
    println!("✓ Watching {:?}\n", client.subscribed_symbols());

    if let Err(e) = client.connect().await {
        println!("✗ Connect failed: {} (client keeps retrying in the background)", e);
    }

    sleep(Duration::from_secs(10)).await;

    client.disconnect();
    println!("\n✓ WebSocket example complete");
}
