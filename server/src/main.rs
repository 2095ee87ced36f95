use clap::Parser;
use log::error;

use parley_server::network::Server;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TCP port to listen on
    #[arg(value_parser = parse_port)]
    port: u16,
}

fn parse_port(value: &str) -> Result<u16, String> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err("port must be a decimal integer".to_owned());
    }
    value.parse().map_err(|_| "port out of range".to_owned())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();

    let args = Args::parse();

    let mut server = match Server::bind(args.port).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("ERROR: bind {}.", e);
            std::process::exit(1);
        }
    };

    // Returns only after the operator types EXIT.
    if let Err(e) = server.run().await {
        error!("server terminated abnormally: {}", e);
        std::process::exit(1);
    }
}
