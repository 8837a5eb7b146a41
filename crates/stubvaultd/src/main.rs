use stubvaultd::server::Server;
use stubvaultd::socket::default_socket_path;
use tracing::info;

#[tokio::main]
async fn main() {
    init_tracing();

    let socket = default_socket_path();
    if let Err(e) = run(&socket.display().to_string()).await {
        eprintln!("stubvaultd: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(endpoint: &str) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::new(endpoint)?;
    server.start().await?;

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutdown requested (ctrl-c)"),
        _ = sigterm.recv() => info!("shutdown requested (sigterm)"),
    }

    server.stop().await;
    Ok(())
}
