mod network;

use clap::Parser;
use log::info;

use parley_shared::protocol::validate_name;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Client name: 1 to 30 alphanumeric characters
    #[arg(value_parser = parse_client_name)]
    name: String,

    /// Server address in dotted-decimal form
    #[arg(value_parser = parse_server_address)]
    address: String,

    /// Server TCP port
    #[arg(value_parser = parse_port)]
    port: u16,
}

fn parse_port(value: &str) -> Result<u16, String> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err("port must be a decimal integer".to_owned());
    }
    value.parse().map_err(|_| "port out of range".to_owned())
}

fn parse_client_name(value: &str) -> Result<String, String> {
    if validate_name(value) {
        Ok(value.to_owned())
    } else {
        Err("client name must be 1 to 30 alphanumeric characters".to_owned())
    }
}

fn parse_server_address(value: &str) -> Result<String, String> {
    let dotted_decimal =
        !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit() || b == b'.');
    if dotted_decimal {
        Ok(value.to_owned())
    } else {
        Err("server address must contain only digits and dots".to_owned())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();

    let args = Args::parse();
    info!("connecting to {}:{} as {}", args.address, args.port, args.name);

    let client = match network::Client::connect(&args.name, &args.address, args.port).await {
        Ok(Some(client)) => client,
        // The handshake refusal message has already been printed.
        Ok(None) => std::process::exit(1),
        Err(e) => {
            eprintln!("ERROR: connect {}.", e);
            std::process::exit(1);
        }
    };

    std::process::exit(client.run().await);
}
