//! Tiny command-line CoAP client.
//!
//! ```text
//! cargo run --example get -- --host coap.me GET coap://coap.me/hello
//! ```

use clap::Parser;
use coap_udp::Client;

#[derive(Parser, Debug)]
#[command(about = "CoAP command-line client")]
struct Cli {
    /// Server host name or address
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Server UDP port
    #[arg(long, default_value_t = coap_udp::DEFAULT_PORT)]
    port: u16,

    /// One of GET, POST, PUT or DELETE
    method: String,

    /// The coap:// URL to request
    url: String,

    /// The payload of the request
    payload: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    simple_logger::SimpleLogger::new().env().init()?;
    let cli = Cli::parse();

    let client = Client::new(&cli.host, cli.port).await?;
    let payload = cli.payload.unwrap_or_default().into_bytes();

    let response = match cli.method.to_uppercase().as_str() {
        "GET" => client.get(&cli.url).await?,
        "POST" => client.post(&cli.url, payload).await?,
        "PUT" => client.put(&cli.url, payload).await?,
        "DELETE" => client.delete(&cli.url).await?,
        other => return Err(format!("unsupported method {other}").into()),
    };

    println!("{}", response.code);
    if !response.payload.is_empty() {
        println!("{}", String::from_utf8_lossy(&response.payload));
    }

    client.close();
    Ok(())
}
