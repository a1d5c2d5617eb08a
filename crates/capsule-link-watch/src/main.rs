//! Capsule Watch - Entry point
//!
//! Connects to one realtime endpoint, subscribes to the given destinations
//! and logs every state change and message until interrupted.

use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing::{error, info, warn};

use capsule_link::{ConnectionRegistry, Headers, RegistryConfig};
use capsule_link_config::{ConfigLoader, DEFAULT_ENV_PREFIX};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
    /// Endpoint path to connect to.
    endpoint: String,
    /// Environment variable holding the access token.
    token_env: String,
    /// Destinations to subscribe to.
    subscribe: Vec<String>,
    /// Optional `destination=json` message published once connected.
    send: Option<(String, String)>,
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        Self::parse_from(std::env::args().skip(1))
    }

    fn parse_from(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let mut parsed = Self {
            config: None,
            endpoint: "/ws-capsule-content".to_string(),
            token_env: "CAPSULE_TOKEN".to_string(),
            subscribe: Vec::new(),
            send: None,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    parsed.config = Some(PathBuf::from(value(&mut args, &arg)?));
                }
                "--endpoint" | "-e" => parsed.endpoint = value(&mut args, &arg)?,
                "--token-env" => parsed.token_env = value(&mut args, &arg)?,
                "--subscribe" | "-s" => parsed.subscribe.push(value(&mut args, &arg)?),
                "--send" => {
                    let raw = value(&mut args, &arg)?;
                    let Some((destination, body)) = raw.split_once('=') else {
                        bail!("--send expects destination=json, got {raw:?}");
                    };
                    parsed.send = Some((destination.to_string(), body.to_string()));
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("capsule-watch {VERSION}");
                    std::process::exit(0);
                }
                other => bail!("unknown argument: {other} (use --help for usage)"),
            }
        }

        Ok(parsed)
    }
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<String> {
    args.next()
        .with_context(|| format!("{flag} requires a value"))
}

fn print_help() {
    println!(
        r#"Capsule Watch - Realtime endpoint watcher

USAGE:
    capsule-watch [OPTIONS]

OPTIONS:
    -c, --config <PATH>         Path to configuration file (TOML or JSON)
    -e, --endpoint <PATH>       Endpoint to connect to (default: /ws-capsule-content)
        --token-env <VAR>       Variable holding the access token (default: CAPSULE_TOKEN)
    -s, --subscribe <DEST>      Destination to subscribe to (repeatable)
        --send <DEST=JSON>      Publish one message once connected
    -h, --help                  Print help information
    -v, --version               Print version information

ENVIRONMENT VARIABLES:
    CAPSULE_LINK__REALTIME__BASE_URL             API base URL
    CAPSULE_LINK__REALTIME__RECONNECT_DELAY_MS   Delay before reconnecting (default: 5000)
    CAPSULE_LINK__LOGGING__LEVEL                 Log filter (default: info)
    CAPSULE_LINK__METRICS__ENABLED               Expose Prometheus metrics

EXAMPLES:
    CAPSULE_TOKEN=eyJ... capsule-watch -s /topic/notifications/alice

    capsule-watch --config capsule-link.toml \
        --send '/app/capsule-content/connect/42={{"capsuleId":42}}'
"#
    );
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %format!("{e:#}"), "capsule-watch failed");
        eprintln!("capsule-watch: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse()?;

    let mut loader = ConfigLoader::new().with_defaults().with_dotenv()?;
    if let Some(path) = &args.config {
        loader = loader.with_file(path)?;
    }
    let config = loader.with_env_prefix(DEFAULT_ENV_PREFIX).load()?;

    capsule_link_telemetry::init_telemetry(&config)?;
    if config.metrics.enabled {
        capsule_link::metrics::describe_metrics();
    }

    let token = std::env::var(&args.token_env)
        .with_context(|| format!("{} is not set", args.token_env))?;

    info!(
        version = VERSION,
        base_url = %config.realtime.base_url,
        endpoint = %args.endpoint,
        "Starting capsule-watch"
    );

    let registry = ConnectionRegistry::new(RegistryConfig::from(&config.realtime));
    let endpoint = args.endpoint.as_str();

    let watch = registry.on_connection_state_change(
        |state| info!(%state, "Connection state"),
        endpoint,
    );

    // The first poll creates the record; subscriptions made before the
    // handshake completes are replayed once it does.
    let connecting = registry.connect(&token, endpoint);
    tokio::pin!(connecting);
    let first = poll_once(&mut connecting).await;

    let mut handles = Vec::with_capacity(args.subscribe.len());

    for destination in &args.subscribe {
        let destination_label = destination.clone();
        let handle = registry.subscribe(
            destination,
            move |result| match result {
                Ok(message) => info!(
                    destination = %destination_label,
                    message_id = ?message.message_id,
                    body = %message.body,
                    "Message"
                ),
                Err(e) => warn!(destination = %destination_label, error = %e, "Undecodable message"),
            },
            Headers::new(),
            endpoint,
        );
        if let Some(e) = handle.error() {
            warn!(destination = %destination, error = %e, "Subscription not recorded");
        }
        handles.push(handle);
    }

    let connected = match first {
        Some(result) => result,
        None => connecting.await,
    };
    if let Err(e) = connected {
        if !e.is_connection_failure() {
            registry.disconnect(endpoint);
            return Err(e.into());
        }
        warn!(error = %e, "Initial connect failed, retrying in the background");
    }

    if let Some((destination, body)) = &args.send {
        let body: serde_json::Value =
            serde_json::from_str(body).context("--send body is not valid JSON")?;
        match registry.send(destination, Headers::new(), &body, endpoint).await {
            Ok(()) => info!(destination = %destination, "Message sent"),
            Err(e) => warn!(destination = %destination, error = %e, "Send failed"),
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutting down");

    for handle in &handles {
        registry.unsubscribe(handle);
    }
    watch.cancel();
    registry.disconnect(endpoint);
    Ok(())
}

/// Poll a future exactly once, returning its output if it finished.
async fn poll_once<F>(future: &mut std::pin::Pin<&mut F>) -> Option<F::Output>
where
    F: std::future::Future,
{
    std::future::poll_fn(|cx| match future.as_mut().poll(cx) {
        std::task::Poll::Ready(output) => std::task::Poll::Ready(Some(output)),
        std::task::Poll::Pending => std::task::Poll::Ready(None),
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<Args> {
        Args::parse_from(args.iter().map(ToString::to_string))
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.endpoint, "/ws-capsule-content");
        assert_eq!(args.token_env, "CAPSULE_TOKEN");
        assert!(args.subscribe.is_empty());
        assert!(args.config.is_none());
    }

    #[test]
    fn test_repeated_subscribe() {
        let args = parse(&["-s", "/topic/a", "--subscribe", "/topic/b", "-e", "/ws-x"]).unwrap();
        assert_eq!(args.subscribe, vec!["/topic/a", "/topic/b"]);
        assert_eq!(args.endpoint, "/ws-x");
    }

    #[test]
    fn test_send_requires_equals() {
        let args = parse(&["--send", "/app/x={\"a\":1}"]).unwrap();
        assert_eq!(
            args.send,
            Some(("/app/x".to_string(), "{\"a\":1}".to_string()))
        );
        assert!(parse(&["--send", "/app/x"]).is_err());
    }

    #[test]
    fn test_missing_value_and_unknown_flag() {
        assert!(parse(&["--config"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
    }
}
