use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use relay_http::{
    BoxResolver, HttpClient, InsecureDefaultPolicy, JsonResolver, RequestDescriptor, Session,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

/// relay - send one HTTP or HTTPS request and print the response envelope
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host, optionally with a port (e.g. example.com:8080)
    host: String,

    /// Request path (e.g. /api/users)
    path: Option<String>,

    /// Send a POST instead of a GET
    #[arg(long)]
    post: bool,

    /// Use HTTPS
    #[arg(long)]
    https: bool,

    /// Request parameter as key=value
    #[arg(short = 'p', long = "param", value_parser = parse_pair)]
    params: Vec<(String, String)>,

    /// Request header as name=value
    #[arg(short = 'H', long = "header", value_parser = parse_pair)]
    headers: Vec<(String, String)>,

    /// File upload as field=path (POST only)
    #[arg(short = 'f', long = "file", value_parser = parse_pair)]
    files: Vec<(String, String)>,

    /// Connection setting as key=value (e.g. UseCaches=false)
    #[arg(short = 's', long = "setting", value_parser = parse_pair)]
    settings: Vec<(String, String)>,

    /// Connect and read timeout in milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Stop waiting after this many milliseconds and cancel the session
    #[arg(long)]
    wait_ms: Option<u64>,

    /// Accept any server certificate and hostname
    #[arg(long)]
    insecure: bool,

    /// Parse the response body as JSON
    #[arg(long)]
    json: bool,
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

fn build_request(args: &Args) -> Result<RequestDescriptor, relay_http::Error> {
    let mut request = RequestDescriptor::new(args.host.clone(), args.path.as_deref())?;
    request.add_params(args.params.iter().cloned());
    for (name, value) in &args.headers {
        request.add_header(name.clone(), value.clone());
    }
    for (field, path) in &args.files {
        request.add_file(field.clone(), PathBuf::from(path));
    }
    request.set_timeout(Duration::from_millis(args.timeout_ms));
    for (key, value) in &args.settings {
        request.set_setting(key.clone(), value.clone());
    }
    Ok(request)
}

fn run(args: Args) -> Result<bool, Box<dyn Error>> {
    let request = build_request(&args)?;

    let mut client = HttpClient::new()?;
    if args.insecure {
        client = client.with_tls_policy(Arc::new(InsecureDefaultPolicy));
    }

    let resolver: Option<BoxResolver<Value>> = if args.json {
        Some(Box::new(JsonResolver::new()))
    } else {
        None
    };

    let session: Session<Value> = match (args.https, args.post) {
        (false, false) => client.get(request, resolver, None),
        (false, true) => client.post(request, resolver, None),
        (true, false) => client.https_get(request, resolver, None),
        (true, true) => client.https_post(request, resolver, None),
    };

    let envelope = match args.wait_ms {
        Some(wait) => session.await_response_timeout(Duration::from_millis(wait), true),
        None => session.await_response(),
    };

    println!("{}", serde_json::to_string_pretty(envelope.as_ref())?);
    Ok(envelope.is_success())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
