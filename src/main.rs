use env_logger::Env;
use log::{error, info};
use room_relay::{routes, Config, Server};
use warp::Filter;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        return;
    }
    info!("Shutdown requested, stopping relay");
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let server = Server::new(config.outbound_buffer);
    let cors = warp::cors().allow_any_origin();

    let bound = match config.static_dir {
        Some(dir) => {
            info!("Serving static files from {}", dir.display());
            let filter = routes(server)
                .or(warp::fs::dir(dir))
                .with(cors);
            warp::serve(filter)
                .try_bind_with_graceful_shutdown(config.bind, shutdown_signal())
                .map(|(addr, running)| (addr, tokio::spawn(running)))
        }
        None => {
            let filter = routes(server).with(cors);
            warp::serve(filter)
                .try_bind_with_graceful_shutdown(config.bind, shutdown_signal())
                .map(|(addr, running)| (addr, tokio::spawn(running)))
        }
    };

    match bound {
        Ok((addr, running)) => {
            info!("Relay listening on {addr}, socket endpoint /ws");
            if let Err(e) = running.await {
                error!("Relay task failed: {e}");
            }
        }
        Err(e) => {
            error!("Failed to bind to {}: {e}", config.bind);
            std::process::exit(1);
        }
    }
}
