//! Pair - two streams connected over an in-memory channel.
//!
//! This example demonstrates:
//! - Connecting a `Stream` with `StreamBuilder::connect`
//! - Half-closing with `close_write` and reading until end of stream
//! - Watching teardown through the close notifier
//!
//! ```text
//! cargo run --example pair
//! ```

use dcstream::{StreamBuilder, StreamConfig};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (left, right) = tokio::io::duplex(64 * 1024);
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();

    let (left_read, left_write) = tokio::io::split(left);
    let (client, _client_writer) = StreamBuilder::new(1)
        .config(StreamConfig::default().max_message_size(1024))?
        .close_notifier(closed_tx)
        .connect(left_read, left_write);

    let (right_read, right_write) = tokio::io::split(right);
    let (server, _server_writer) = StreamBuilder::new(1).connect(right_read, right_write);

    // Echo everything back, then finish our side.
    let echo = async {
        let mut request = Vec::new();
        server.reader().read_to_end(&mut request).await?;
        server.write(&request).await?;
        server.close_write().await
    };

    let request = async {
        let message = "hello over a framed channel ".repeat(100);
        client.write(message.as_bytes()).await?;
        client.close_write().await?;

        let mut reply = Vec::new();
        client.reader().read_to_end(&mut reply).await?;
        client.close_read().await?;
        Ok::<_, dcstream::StreamError>((message.len(), reply.len()))
    };

    let (echoed, sizes) = tokio::join!(echo, request);
    echoed?;
    let (sent, received) = sizes?;
    println!("sent {} bytes, received {} bytes back", sent, received);

    if let Some(id) = closed_rx.recv().await {
        println!("stream {} closed", id);
    }

    Ok(())
}
