use binance_ws_api::{Credentials, Session, SessionConfig, UserStreamConfig, UserStreamEvent};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let credentials =
        Credentials::from_env().ok_or("set BINANCE_API_KEY and BINANCE_API_SECRET")?;
    let config =
        SessionConfig::new(credentials).with_user_stream(UserStreamConfig::default().verbose());

    println!("Connecting to the WebSocket API...");
    let session = Session::new(config);
    session.wait_connected().await?;

    let server_time = session.time().await?;
    println!("Connected! Server time: {server_time}");
    let limits = session.rate_limit();
    println!("Request weight: {}/{} ({} left)", limits.count, limits.limit, limits.remain);

    let mut events = session.user_events();
    let listen_key = session.start_user_stream().await?;
    println!("User data stream started ({} chars key)", listen_key.len());
    println!("Waiting for account events, Ctrl-C to stop...\n");

    let mut event_count = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(UserStreamEvent::Data(data)) => {
                    event_count += 1;
                    println!("[{} #{}]", data.event_type, event_count);
                    println!("  {}", data.payload);
                }
                Ok(UserStreamEvent::Open) => println!("Stream socket open"),
                Ok(UserStreamEvent::Close) => println!("Stream socket closed, reconnecting..."),
                Ok(UserStreamEvent::Error(e)) => println!("Stream error: {e}"),
                Err(RecvError::Lagged(skipped)) => println!("Skipped {skipped} events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    println!("\nClosing after {event_count} events...");
    session.close().await;
    Ok(())
}
