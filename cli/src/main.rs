use clap::Parser;
use optinfo_cli::OptinfoCli;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("optinfo_remarks=debug,optinfo_cli=debug,warn"),
        _ => EnvFilter::new("optinfo_remarks=trace,optinfo_cli=trace,info"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = OptinfoCli::parse();
    init_tracing(cli.verbose);
    cli.run().await
}
