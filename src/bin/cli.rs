//! gedis-cli: sends one command to a gedis server, or runs a short demo.
//!
//! ```text
//! gedis-cli SET name Ariz
//! gedis-cli --port 7000 KEYS
//! gedis-cli                    # demo sequence
//! ```

use anyhow::Context;
use clap::Parser;
use gedis::client::{Client, ClientError};
use gedis::storage::Ttl;
use gedis::{DEFAULT_HOST, DEFAULT_PORT};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "gedis-cli", version, about = "Command-line client for gedis")]
struct Args {
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Command to run; runs the demo when empty
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let mut client = Client::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;

    if args.command.is_empty() {
        run_demo(&mut client).await?;
    } else {
        match client.command(&args.command).await {
            Ok(reply) => println!("{reply}"),
            Err(ClientError::Server(msg)) => println!("(error) {msg}"),
            Err(e) => return Err(e.into()),
        }
    }

    client.close().await?;
    Ok(())
}

async fn run_demo(client: &mut Client) -> anyhow::Result<()> {
    println!("PING -> {}", client.ping().await?);

    client.set("greeting", "Hello from gedis").await?;
    println!("SET greeting -> OK");
    println!("GET greeting -> {:?}", client.get_string("greeting").await?);

    client
        .set_ex("session", "token123", Duration::from_secs(60))
        .await?;
    let ttl = match client.ttl("session").await? {
        Ttl::Remaining(left) => format!("{}s", left.as_secs()),
        Ttl::Persistent => "no expiry".to_string(),
        Ttl::Missing => "missing".to_string(),
    };
    println!("SETEX session 60 -> TTL {ttl}");

    println!("KEYS:");
    for line in format_keys(&client.keys().await?) {
        println!("{line}");
    }
    Ok(())
}

fn format_keys(keys: &[String]) -> Vec<String> {
    if keys.is_empty() {
        return vec!["(empty array)".to_string()];
    }
    keys.iter()
        .enumerate()
        .map(|(i, key)| format!("{}) \"{}\"", i + 1, key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_keys() {
        let keys = vec!["a".to_string(), "greeting".to_string()];
        assert_eq!(format_keys(&keys), vec!["1) \"a\"", "2) \"greeting\""]);
        assert_eq!(format_keys(&[]), vec!["(empty array)"]);
    }

    #[test]
    fn test_trailing_command() {
        let args = Args::try_parse_from(["gedis-cli", "-p", "7000", "SET", "k", "v"]).unwrap();
        assert_eq!(args.port, 7000);
        assert_eq!(args.command, vec!["SET", "k", "v"]);
    }
}
