use std::{
    io::{self, Read, Write},
    net::{self, SocketAddr},
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use nanoid::nanoid;
use netem_throttle::{
    HalfClose, PumpReport, ThrottleConfig, Throttler,
    queue::{DEFAULT_CAPACITY, DEFAULT_GROWTH},
};
use tokio::{net::TcpListener, signal};
use tracing::{Span, debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Config {
    /// Address to listen on, e.g. 0.0.0.0:8080
    #[arg(short = 'l', long)]
    listen: SocketAddr,

    /// Address to connect upstream to, e.g. 127.0.0.1:8181
    #[arg(short = 'c', long)]
    upstream: SocketAddr,

    /// One-way latency added in each direction, in milliseconds
    #[arg(long, value_name = "ms", default_value_t = 0)]
    latency_ms: u64,

    /// Bandwidth ceiling in bits per second, 0 for unlimited
    #[arg(long, value_name = "bits/s", default_value_t = 0)]
    bandwidth_bps: u64,

    /// Initial capacity of each direction's queue, in bytes
    #[arg(long, value_name = "bytes", default_value_t = DEFAULT_CAPACITY)]
    queue_capacity: usize,

    /// Growth factor applied when a queue is full, must be > 1.0
    #[arg(long, value_name = "factor", default_value_t = DEFAULT_GROWTH)]
    queue_growth: f64,
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        self.throttle_config()
            .validate()
            .context("invalid --queue-capacity or --queue-growth")?;

        Ok(())
    }

    fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig::new(Duration::from_millis(self.latency_ms), self.bandwidth_bps)
            .with_queue(self.queue_capacity, self.queue_growth)
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cfg = Config::parse();
    cfg.validate()?;

    let config = Arc::new(cfg);

    let listener = TcpListener::bind(config.listen).await?;
    info!(
        listen = %config.listen,
        connect = %config.upstream,
        latency_ms = config.latency_ms,
        bandwidth_bps = config.bandwidth_bps,
        "Listening"
    );

    loop {
        tokio::select! {
            res = listener.accept() => match res {
                Ok((stream, addr)) => {
                    if let Err(err) = spawn_connection(stream, addr, config.clone()) {
                        error!(error = %err, client = %addr, "failed to start connection");
                    }
                }
                Err(e) => {
                    error!(%e, "accept failed");
                }
            },
            _ = signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Moves an accepted socket onto its own OS thread; the throttler works on blocking streams.
fn spawn_connection(
    stream: tokio::net::TcpStream,
    addr: SocketAddr,
    config: Arc<Config>,
) -> anyhow::Result<()> {
    let downstream = stream.into_std()?;
    downstream.set_nonblocking(false)?;

    let id = nanoid!();
    let span = tracing::info_span!("conn", %id, client = %addr, upstream = %config.upstream);

    thread::Builder::new()
        .name(format!("conn-{id}"))
        .spawn(move || {
            let _entered = span.enter();
            if let Err(err) = handle_connection(downstream, &config) {
                error!(error = %err, "proxy error {} -> {}", addr, config.upstream);
            }
        })?;

    Ok(())
}

fn handle_connection(downstream: net::TcpStream, config: &Config) -> anyhow::Result<()> {
    let upstream = net::TcpStream::connect(config.upstream)
        .with_context(|| format!("failed to connect upstream {}", config.upstream))?;

    // Nagle stays on: throttled halves release one byte per write
    info!("connected → {}", config.upstream);

    let throttled = Throttler::wrap(config.throttle_config(), upstream.try_clone()?, upstream)?;
    if throttled.is_passthrough() {
        info!("latency and bandwidth are zero, relaying unthrottled");
    }
    let (from_upstream, to_upstream, throttler) = throttled.into_split();

    let client_reader = downstream.try_clone()?;
    let span = Span::current();
    let uplink = thread::Builder::new()
        .name("uplink".into())
        .spawn(move || {
            let _entered = span.enter();
            relay(client_reader, to_upstream)
        })?;

    let down = relay(from_upstream, downstream);
    let up = uplink
        .join()
        .map_err(|_| anyhow::anyhow!("uplink thread panicked"))?;

    if let Some(throttler) = throttler {
        log_reports(&throttler.join());
    }

    let (up, down) = (up?, down?);
    info!(up, down, "connection closed");
    Ok(())
}

/// Copies `source` into `sink` and half-closes the sink on end of stream.
fn relay<R: Read, W: Write + HalfClose>(mut source: R, mut sink: W) -> io::Result<u64> {
    let n = io::copy(&mut source, &mut sink)?;
    sink.close_write()?;
    Ok(n)
}

fn log_reports(reports: &[PumpReport]) {
    for report in reports {
        if report.is_ok() {
            debug!(pump = %report.name, bytes = report.bytes, "pump done");
        } else {
            warn!(pump = %report.name, bytes = report.bytes, outcome = ?report.outcome, "pump did not end cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["throttle-proxy", "-l", "127.0.0.1:0", "-c", "127.0.0.1:1"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_disable_throttling() {
        let cfg = parse(&[]);
        cfg.validate().unwrap();

        let throttle = cfg.throttle_config();
        assert!(throttle.is_disabled());
        assert_eq!(throttle.queue_capacity(), DEFAULT_CAPACITY);
        assert_eq!(throttle.queue_growth(), DEFAULT_GROWTH);
    }

    #[test]
    fn flags_reach_throttle_config() {
        let cfg = parse(&[
            "--latency-ms",
            "40",
            "--bandwidth-bps",
            "64000",
            "--queue-capacity",
            "16",
            "--queue-growth",
            "2.0",
        ]);
        cfg.validate().unwrap();

        let throttle = cfg.throttle_config();
        assert_eq!(throttle.latency(), Duration::from_millis(40));
        assert_eq!(throttle.bandwidth_bps(), 64_000);
        assert_eq!(throttle.queue_capacity(), 16);
        assert_eq!(throttle.queue_growth(), 2.0);
    }

    #[test]
    fn rejects_bad_queue_params() {
        assert!(parse(&["--queue-capacity", "0"]).validate().is_err());
        assert!(parse(&["--queue-growth", "1.0"]).validate().is_err());
        assert!(parse(&["--queue-growth", "0.5"]).validate().is_err());

        let err = parse(&["--queue-growth", "NaN"]).validate().unwrap_err();
        assert!(err.to_string().contains("--queue-growth"), "{err}");
        assert!(
            err.root_cause().to_string().contains("growth factor"),
            "{err:#}"
        );
    }

    #[test]
    fn proxies_through_throttled_upstream() {
        let upstream = net::TcpListener::bind("127.0.0.1:0").unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        let echo = thread::spawn(move || {
            let (mut s, _) = upstream.accept().unwrap();
            let mut buf = Vec::new();
            s.read_to_end(&mut buf).unwrap();
            s.write_all(&buf).unwrap();
        });

        let front = net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = net::TcpStream::connect(front.local_addr().unwrap()).unwrap();
        let (downstream, _) = front.accept().unwrap();

        let config = Config::try_parse_from([
            "throttle-proxy",
            "-l",
            "127.0.0.1:0",
            "-c",
            &upstream_addr.to_string(),
            "--latency-ms",
            "10",
        ])
        .unwrap();
        let proxy = thread::spawn(move || handle_connection(downstream, &config));

        client.write_all(b"round trip").unwrap();
        client.shutdown(net::Shutdown::Write).unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();

        assert_eq!(reply, b"round trip");
        proxy.join().unwrap().unwrap();
        echo.join().unwrap();
    }
}
