use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use chat_relay::{
    cli::{Cli, Command},
    client, server,
};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => {
            let listener = server::bind(&args.host, args.port).await?;
            let server = server::Server::new(listener);
            let addr = server.local_addr()?;
            info!("listening on {}", addr);
            if let Err(err) = server.run_until(server::shutdown_signal()).await {
                warn!("server exited with error: {err:?}");
                return Err(err);
            }
            // Hard exit: stdin readers and relay tasks are not waited on.
            std::process::exit(0);
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
