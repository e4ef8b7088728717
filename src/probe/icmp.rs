use std::io;
use std::net::IpAddr;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use parking_lot::Mutex;
use surge_ping::{Client, Config as PingConfig, PingIdentifier, PingSequence, SurgeError, ICMP};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::stats::RttAccumulator;
use super::{ProbeError, ProbeHandle, ProbeSource};
use crate::models::{StatisticsSnapshot, Target};

/// ICMP echo probe source backed by `surge-ping`.
pub struct IcmpProbe {
    resolver: TokioResolver,
}

impl IcmpProbe {
    pub fn new() -> Self {
        let resolver = match TokioResolver::builder_tokio() {
            Ok(builder) => builder.build(),
            Err(e) => {
                warn!(error = %e, "system resolver config unavailable, falling back to Cloudflare 1.1.1.1 / 1.0.0.1");
                TokioResolver::builder_with_config(
                    ResolverConfig::cloudflare(),
                    TokioConnectionProvider::default(),
                )
                .build()
            }
        };
        Self { resolver }
    }

    async fn resolve(&self, host: &str) -> Result<IpAddr, ProbeError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| ProbeError::Unresolvable {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        lookup.iter().next().ok_or_else(|| ProbeError::Unresolvable {
            host: host.to_string(),
            reason: "no IP address found".into(),
        })
    }
}

impl Default for IcmpProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeSource for IcmpProbe {
    type Handle = IcmpSession;

    async fn start(&self, target: &Target) -> Result<IcmpSession, ProbeError> {
        let addr = self.resolve(target.host()).await?;

        let mut builder = PingConfig::builder().ttl(u32::from(target.ttl));
        if addr.is_ipv6() {
            builder = builder.kind(ICMP::V6);
        }
        if let Some(iface) = &target.id.interface {
            builder = builder.interface(iface);
        }
        let client = Client::new(&builder.build()).map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => ProbeError::PermissionDenied(e),
            _ => ProbeError::Transport(e.to_string()),
        })?;

        info!(target_id = %target.id, %addr, "PING {} ({})", target.host(), addr);
        Ok(IcmpSession::new(target.clone(), addr, client))
    }
}

/// One running echo stream towards a resolved address.
pub struct IcmpSession {
    target: Target,
    addr: IpAddr,
    client: Client,
    ident: PingIdentifier,
    stats: Mutex<RttAccumulator>,
    stop_tx: watch::Sender<bool>,
}

impl IcmpSession {
    fn new(target: Target, addr: IpAddr, client: Client) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            target,
            addr,
            client,
            ident: PingIdentifier(rand::random()),
            stats: Mutex::new(RttAccumulator::default()),
            stop_tx,
        }
    }

    async fn ping_once(&self, seq: u16, payload: &[u8]) -> (u16, Result<Duration, SurgeError>) {
        let mut pinger = self.client.pinger(self.addr, self.ident).await;
        pinger.timeout(self.target.reply_timeout);
        let reply = pinger
            .ping(PingSequence(seq), payload)
            .await
            .map(|(_, rtt)| rtt);
        (seq, reply)
    }
}

impl ProbeHandle for IcmpSession {
    fn statistics(&self) -> StatisticsSnapshot {
        self.stats.lock().snapshot(Some(self.addr))
    }

    fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    async fn run(&self) -> Result<(), ProbeError> {
        let mut stopped = self.stop_tx.subscribe();
        if *stopped.borrow_and_update() {
            return Ok(());
        }

        let payload = vec![0u8; self.target.size];
        let deadline = async {
            match self.target.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let mut ticker = tokio::time::interval(self.target.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut in_flight = FuturesUnordered::new();
        let mut seq: u16 = 0;
        let mut sent: u64 = 0;

        loop {
            let exhausted = self.target.count.is_some_and(|count| sent >= u64::from(count));
            if exhausted && in_flight.is_empty() {
                debug!(target_id = %self.target.id, sent, "packet count exhausted");
                return Ok(());
            }

            tokio::select! {
                _ = stopped.changed() => {
                    debug!(target_id = %self.target.id, "probe stream stopped");
                    return Ok(());
                }
                _ = &mut deadline => {
                    debug!(target_id = %self.target.id, "probe run timed out");
                    return Ok(());
                }
                _ = ticker.tick(), if !exhausted => {
                    in_flight.push(self.ping_once(seq, &payload));
                    self.stats.lock().record_send();
                    seq = seq.wrapping_add(1);
                    sent += 1;
                }
                Some((icmp_seq, reply)) = in_flight.next(), if !in_flight.is_empty() => {
                    match reply {
                        Ok(rtt) => {
                            self.stats.lock().record_reply(rtt);
                            debug!(
                                target_id = %self.target.id,
                                icmp_seq,
                                rtt_ms = rtt.as_secs_f64() * 1000.0,
                                ttl = self.target.ttl,
                                "{} bytes from {}",
                                self.target.size,
                                self.addr
                            );
                        }
                        Err(SurgeError::Timeout { .. }) => {
                            debug!(target_id = %self.target.id, icmp_seq, "request timeout");
                        }
                        Err(SurgeError::IOError(e)) => {
                            return Err(ProbeError::Transport(e.to_string()));
                        }
                        Err(e) => {
                            debug!(target_id = %self.target.id, icmp_seq, error = %e, "discarding reply");
                        }
                    }
                }
            }
        }
    }
}
