use std::env;

use stracker::udp_server::server::TrackerServer;
use tracing::error;

#[tokio::main]
async fn main() {
    // install global collector configured based on RUST_LOG env var.
    tracing_subscriber::fmt::init();

    if env::args().count() != 2 {
        return error!("Incorrect number of arguments. Only a port number should be passed");
    };
    let port = match env::args().last() {
        Some(s) if s.parse::<u16>().is_ok() => match s.parse::<u16>() {
            Ok(port) => port,
            Err(_) => return error!("Invalid port number"),
        },
        _ => return error!("Invalid port number"),
    };

    match TrackerServer::bind(&format!("0.0.0.0:{}", port)).await {
        Ok(server) => server.run().await,
        Err(e) => error!("Error: {:?}", e),
    }
}
