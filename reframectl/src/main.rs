use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = reframectl::Cli::parse();
    if let Err(err) = reframectl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
