use cinder_node::{NodeConfig, Server};

fn main() {
    tracing_subscriber::fmt::init();

    let addr = std::env::var("CINDER_ADDR").unwrap_or_else(|_| "0.0.0.0:9160".to_string());
    let server = Server::new(NodeConfig::from_env(), &addr);
    if let Err(e) = server.serve() {
        tracing::error!("cinder-node failed: {e}");
        std::process::exit(1);
    }
}
