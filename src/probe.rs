use futures::stream::{FuturesUnordered, StreamExt};
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;
use surge_ping::{Client as PingClient, Config as PingConfig, PingIdentifier, PingSequence, SurgeError, ICMP};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};

use crate::error::{Result, WatchdogError};
use crate::models::{ProbeResult, ProbeStatus, RoundOutcome};
use crate::utils::plural;

/// A single reachability check against one destination.
///
/// Implementations report every kind of failure through the returned
/// [`ProbeResult`]; they never error.
pub trait Probe {
    fn check(&self, destination: &str, timeout: Duration) -> impl Future<Output = ProbeResult> + Send;
}

/// ICMP echo probe. Host names are resolved before pinging.
pub struct IcmpProbe {
    v4: PingClient,
    v6: Option<PingClient>,
    dns_resolver: TokioResolver,
}

impl IcmpProbe {
    pub fn new() -> Result<Self> {
        let v4 = PingClient::new(&PingConfig::default()).map_err(WatchdogError::PingClient)?;

        let v6 = match PingClient::new(&PingConfig::builder().kind(ICMP::V6).build()) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("IPv6 ping client unavailable, IPv6 destinations will fail: {}", e);
                None
            }
        };

        let dns_resolver = TokioResolver::builder_with_config(
            ResolverConfig::cloudflare(),
            TokioConnectionProvider::default(),
        )
        .build();

        Ok(Self { v4, v6, dns_resolver })
    }

    async fn resolve(&self, address: &str) -> std::result::Result<IpAddr, String> {
        if let Ok(ip) = address.parse::<IpAddr>() {
            return Ok(ip);
        }
        match self.dns_resolver.lookup_ip(address).await {
            Ok(lookup) => lookup.iter().next().ok_or_else(|| "No IP Address Found".into()),
            Err(e) => Err(format!("DNS Resolution Failed: {}", e)),
        }
    }
}

impl Probe for IcmpProbe {
    async fn check(&self, destination: &str, timeout: Duration) -> ProbeResult {
        let ip = match self.resolve(destination).await {
            Ok(ip) => ip,
            Err(e) => {
                debug!("{} - {}", destination, e);
                return ProbeResult::failure(destination, ProbeStatus::Unresolved);
            }
        };

        let client = match (ip, &self.v6) {
            (IpAddr::V4(_), _) => &self.v4,
            (IpAddr::V6(_), Some(v6)) => v6,
            (IpAddr::V6(_), None) => {
                return ProbeResult::failure(destination, ProbeStatus::Failed("IPv6 unavailable".into()));
            }
        };

        let payload = [0u8; 56];
        let mut pinger = client.pinger(ip, PingIdentifier(rand::random())).await;
        pinger.timeout(timeout);

        match pinger.ping(PingSequence(0), &payload).await {
            Ok((_, round_trip)) => ProbeResult::success(destination, round_trip),
            Err(SurgeError::Timeout { .. }) => ProbeResult::failure(destination, ProbeStatus::TimedOut),
            Err(e) => ProbeResult::failure(destination, ProbeStatus::Failed(e.to_string())),
        }
    }
}

/// Fans one check out per destination and joins them into a [`RoundOutcome`].
pub struct Prober<P> {
    probe: P,
}

impl<P: Probe> Prober<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }

    /// Check every destination concurrently and wait for all of them.
    ///
    /// Individual failures and timeouts are counted; only cancellation is
    /// returned as an error.
    pub async fn probe(
        &self,
        destinations: &[String],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<RoundOutcome> {
        info!(
            "Performing ping checks to {} {}...",
            destinations.len(),
            plural(destinations.len(), "host", "hosts")
        );

        let mut checks: FuturesUnordered<_> = destinations
            .iter()
            .map(|destination| self.check_one(destination, timeout))
            .collect();

        let mut results = Vec::with_capacity(destinations.len());
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WatchdogError::Cancelled),
                next = checks.next() => match next {
                    Some(result) => results.push(result),
                    None => break,
                },
            }
        }

        let outcome = RoundOutcome::from_results(&results);
        let (level, msg) = summarize(&outcome);
        if level == Level::ERROR {
            error!("{}", msg);
        } else if level == Level::WARN {
            warn!("{}", msg);
        } else {
            info!("{}", msg);
        }
        Ok(outcome)
    }

    async fn check_one(&self, destination: &str, timeout: Duration) -> ProbeResult {
        let result = match tokio::time::timeout(timeout, self.probe.check(destination, timeout)).await {
            Ok(result) => result,
            Err(_) => ProbeResult::failure(destination, ProbeStatus::TimedOut),
        };

        match result.round_trip_ms() {
            Some(ms) if result.is_reachable() => {
                info!("{} - {} - Round Trip: {}ms", result.destination, result.status, ms)
            }
            _ => info!("{} - {}", result.destination, result.status),
        }
        result
    }
}

/// Severity and text of the end-of-round summary line.
pub fn summarize(outcome: &RoundOutcome) -> (Level, String) {
    let successes = format!(
        "{} {} {} successful",
        outcome.success_count,
        plural(outcome.success_count, "ping", "pings"),
        plural(outcome.success_count, "was", "were"),
    );
    if outcome.all_succeeded() {
        return (Level::INFO, successes);
    }

    let msg = format!(
        "{}, but {} {} failed",
        successes,
        outcome.failure_count,
        plural(outcome.failure_count, "ping", "pings")
    );
    if outcome.all_failed() {
        (Level::ERROR, msg)
    } else {
        (Level::WARN, msg)
    }
}
