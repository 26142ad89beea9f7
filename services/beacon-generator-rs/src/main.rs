//! Beacon load generator for the tracking service.
//!
//! Replays the beacons a portfolio front end sends (page views, button
//! clicks, scroll milestones) against `POST /track` at a target rate.
//!
//! ```text
//! ┌─────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │ Args        │    │ Worker pool      │    │ Stats           │
//! │ target, rps │───▶│ tokio tasks,     │───▶│ latency min/avg │
//! │ pattern     │    │ shared client    │    │ /max, accepted  │
//! └─────────────┘    └──────────────────┘    └─────────────────┘
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

// ── Configuration ───────────────────────────────────────────────────────────────

#[derive(Parser, Debug, Clone)]
#[command(name = "beacon-generator")]
#[command(about = "Load generator for the portfolio tracking endpoint")]
struct Args {
    /// Tracking service base URL
    #[arg(short, long, default_value = "http://localhost:8000")]
    target: String,

    /// Target beacons per second across all workers
    #[arg(short, long, default_value = "200")]
    rps: u64,

    /// Run duration in seconds
    #[arg(short, long, default_value = "60")]
    duration: u64,

    /// Which beacons to send
    #[arg(short, long, value_enum, default_value = "mixed")]
    pattern: BeaconPattern,

    /// Number of worker tasks
    #[arg(short, long, default_value = "20")]
    workers: usize,

    /// Send detail fields flat on the body instead of under `event_data`
    #[arg(long)]
    legacy: bool,

    /// Stamp each beacon with a random X-Forwarded-For client address
    #[arg(long)]
    forwarded_for: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BeaconPattern {
    PageView,
    ButtonClick,
    ScrollDepth,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BeaconKind {
    PageView,
    ButtonClick,
    ScrollDepth,
}

impl BeaconKind {
    fn event_type(self) -> &'static str {
        match self {
            Self::PageView => "page_view",
            Self::ButtonClick => "button_click",
            Self::ScrollDepth => "scroll_depth",
        }
    }
}

impl BeaconPattern {
    /// Mixed traffic is roughly what a real visit looks like: mostly page
    /// views, some scroll milestones, few clicks.
    fn pick(self, rng: &mut impl Rng) -> BeaconKind {
        match self {
            Self::PageView => BeaconKind::PageView,
            Self::ButtonClick => BeaconKind::ButtonClick,
            Self::ScrollDepth => BeaconKind::ScrollDepth,
            Self::Mixed => match rng.gen_range(0..100) {
                0..=59 => BeaconKind::PageView,
                60..=84 => BeaconKind::ScrollDepth,
                _ => BeaconKind::ButtonClick,
            },
        }
    }
}

const PAGES: [&str; 5] = ["/", "/projects", "/about", "/blog", "/contact"];
const BUTTONS: [(&str, &str); 3] = [
    ("cta-hire", "Hire me"),
    ("nav-projects", "Projects"),
    ("download-cv", "Download CV"),
];
const HOST: &str = "portfolio.example";

/// One beacon body as the front end would send it.
fn beacon(kind: BeaconKind, legacy: bool, rng: &mut impl Rng) -> Value {
    let page = PAGES.choose(rng).copied().unwrap_or("/");
    let data = match kind {
        BeaconKind::PageView => json!({ "time_on_page": rng.gen_range(0..120_000) }),
        BeaconKind::ButtonClick => {
            let (element, text) = BUTTONS.choose(rng).copied().unwrap_or(BUTTONS[0]);
            json!({ "element": element, "text": text })
        }
        BeaconKind::ScrollDepth => json!({ "scroll_depth": ([25, 50, 75, 100].choose(rng)) }),
    };

    let mut body = json!({
        "event_type": kind.event_type(),
        "url": format!("https://{HOST}{page}"),
        "referrer": "https://www.google.com/",
        "user_agent": format!("beacon-generator/{}", env!("CARGO_PKG_VERSION")),
        "host": HOST,
        "session": Uuid::new_v4().to_string(),
    });
    if let (Value::Object(body), Value::Object(data)) = (&mut body, data) {
        if legacy {
            body.extend(data);
        } else {
            body.insert("event_data".to_string(), Value::Object(data));
        }
    }
    body
}

fn random_client_address(rng: &mut impl Rng) -> String {
    // 198.51.100.0/24 is reserved for documentation.
    format!("198.51.100.{}", rng.gen_range(1..255))
}

// ── Stats ───────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Stats {
    sent: AtomicU64,
    accepted: AtomicU64,
    failed: AtomicU64,
    total_latency_ms: AtomicU64,
    max_latency_ms: AtomicU64,
    min_latency_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Summary {
    sent: u64,
    accepted: u64,
    failed: u64,
    success_rate: f64,
    avg_latency_ms: u64,
    min_latency_ms: u64,
    max_latency_ms: u64,
}

impl Stats {
    fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            max_latency_ms: AtomicU64::new(0),
            min_latency_ms: AtomicU64::new(u64::MAX),
        }
    }

    fn record(&self, accepted: bool, latency_ms: u64) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        if !accepted {
            self.failed.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.max_latency_ms.fetch_max(latency_ms, Ordering::Relaxed);
        self.min_latency_ms.fetch_min(latency_ms, Ordering::Relaxed);
    }

    fn summary(&self) -> Summary {
        let sent = self.sent.load(Ordering::Relaxed);
        let accepted = self.accepted.load(Ordering::Relaxed);
        let min = self.min_latency_ms.load(Ordering::Relaxed);
        Summary {
            sent,
            accepted,
            failed: self.failed.load(Ordering::Relaxed),
            success_rate: if sent > 0 {
                accepted as f64 / sent as f64 * 100.0
            } else {
                0.0
            },
            avg_latency_ms: self
                .total_latency_ms
                .load(Ordering::Relaxed)
                .checked_div(accepted)
                .unwrap_or(0),
            min_latency_ms: if min == u64::MAX { 0 } else { min },
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
        }
    }
}

// ── Generator ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Generator {
    client: Client,
    stats: Arc<Stats>,
    args: Arc<Args>,
}

impl Generator {
    fn new(args: Args) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(args.workers)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            client,
            stats: Arc::new(Stats::new()),
            args: Arc::new(args),
        })
    }

    fn track_url(&self) -> String {
        format!("{}/track", self.args.target.trim_end_matches('/'))
    }

    async fn run(&self) -> Result<()> {
        info!(
            target = %self.args.target,
            rps = self.args.rps,
            duration_s = self.args.duration,
            pattern = ?self.args.pattern,
            workers = self.args.workers,
            "starting beacon generator"
        );
        self.probe().await?;

        let reporter = {
            let stats = Arc::clone(&self.stats);
            tokio::spawn(async move {
                let mut ticker = interval(Duration::from_secs(5));
                let started = Instant::now();
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let elapsed = started.elapsed().as_secs_f64();
                    let s = stats.summary();
                    info!(
                        rps = s.sent as f64 / elapsed,
                        success_rate = s.success_rate,
                        avg_ms = s.avg_latency_ms,
                        max_ms = s.max_latency_ms,
                        "progress"
                    );
                }
            })
        };

        let started = Instant::now();
        let duration = Duration::from_secs(self.args.duration);
        let workers = self.args.workers.max(1);
        let per_worker = Duration::from_secs_f64(workers as f64 / self.args.rps.max(1) as f64)
            .max(Duration::from_micros(1));

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let generator = self.clone();
                tokio::spawn(async move { generator.worker_loop(started, duration, per_worker).await })
            })
            .collect();
        for handle in handles {
            handle.await?;
        }
        reporter.abort();

        self.print_final_report(started.elapsed());
        Ok(())
    }

    /// Fail fast if the service is not up; report where beacons will land.
    async fn probe(&self) -> Result<()> {
        let status: Value = self
            .client
            .get(self.track_url())
            .send()
            .await
            .context("tracking service unreachable")?
            .error_for_status()?
            .json()
            .await?;
        info!(
            kafka_available = %status["kafka_available"],
            transport = %status["transport"],
            "tracking service is up"
        );
        if status["kafka_available"] == Value::Bool(false) {
            warn!("service has no broker configured, beacons will only be logged");
        }
        Ok(())
    }

    async fn worker_loop(&self, started: Instant, duration: Duration, every: Duration) {
        // Spread worker start times so requests don't arrive in lockstep.
        let jitter = rand::thread_rng().gen_range(0..=every.as_millis().min(1_000) as u64);
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let mut ticker = interval(every);
        while started.elapsed() < duration {
            ticker.tick().await;
            self.send_beacon().await;
        }
    }

    async fn send_beacon(&self) {
        let (body, client_address) = {
            let mut rng = rand::thread_rng();
            let kind = self.args.pattern.pick(&mut rng);
            let address = self
                .args
                .forwarded_for
                .then(|| random_client_address(&mut rng));
            (beacon(kind, self.args.legacy, &mut rng), address)
        };

        let mut request = self.client.post(self.track_url()).json(&body);
        if let Some(address) = client_address {
            request = request.header("x-forwarded-for", address);
        }

        let started = Instant::now();
        let accepted = match request.send().await {
            Ok(response) if response.status().is_success() => response
                .json::<Value>()
                .await
                .map(|reply| reply["success"] == Value::Bool(true))
                .unwrap_or(false),
            Ok(response) => {
                warn!(status = %response.status(), "beacon rejected");
                false
            }
            Err(e) => {
                warn!("beacon request failed: {e}");
                false
            }
        };
        self.stats
            .record(accepted, started.elapsed().as_millis() as u64);
    }

    fn print_final_report(&self, elapsed: Duration) {
        let s = self.stats.summary();
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);

        println!("\nBeacon generation complete\n");
        println!("   Sent:         {}", s.sent);
        println!("   Accepted:     {}", s.accepted);
        println!("   Failed:       {}", s.failed);
        println!("   Success Rate: {:.2}%", s.success_rate);
        println!("   Avg Latency:  {}ms", s.avg_latency_ms);
        println!("   Min Latency:  {}ms", s.min_latency_ms);
        println!("   Max Latency:  {}ms", s.max_latency_ms);
        println!("   Target RPS:   {}", self.args.rps);
        println!("   Actual RPS:   {:.2}", s.sent as f64 / secs);
    }
}

// ── Main ───────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    Generator::new(args)?.run().await
}
