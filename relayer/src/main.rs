use bridge_relayer::{config::Config, supervisor::Supervisor};
use clap::Parser;
use log::error;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config = Config::parse();
    if let Err(e) = Supervisor::new(config).run().await {
        error!("relayer terminated: {:#}", e);
        std::process::exit(1);
    }
}
