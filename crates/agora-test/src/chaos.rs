//! Chaos link conditioning
//!
//! Simulates hostile classroom networks between loopback endpoints:
//! - Latency and jitter
//! - Random and burst loss
//! - Reordering
//! - Duplication

use std::time::Duration;

use agora_transport::{Datagram, LinkConditioner};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

/// Jitter distribution type
#[derive(Clone, Debug)]
pub enum JitterDistribution {
    /// No jitter
    None,
    /// Uniform distribution
    Uniform { min_ms: u32, max_ms: u32 },
    /// Pareto distribution (heavy tail), capped at one second
    Pareto { scale_ms: f64, shape: f64 },
}

impl JitterDistribution {
    /// Sample a jitter value
    pub fn sample(&self, rng: &mut StdRng) -> Duration {
        match self {
            JitterDistribution::None => Duration::ZERO,
            JitterDistribution::Uniform { min_ms, max_ms } => {
                if max_ms <= min_ms {
                    return Duration::from_millis(u64::from(*min_ms));
                }
                let dist = Uniform::new(*min_ms, *max_ms);
                Duration::from_millis(u64::from(dist.sample(rng)))
            }
            JitterDistribution::Pareto { scale_ms, shape } => {
                let u: f64 = rng.gen_range(f64::EPSILON..1.0);
                let value = scale_ms / u.powf(1.0 / shape) - scale_ms;
                Duration::from_millis(value.clamp(0.0, 1000.0) as u64)
            }
        }
    }
}

/// Network chaos configuration
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Base one-way latency
    pub base_latency: Duration,
    pub jitter: JitterDistribution,
    /// Independent loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    /// Chance that a datagram starts a loss burst
    pub burst_loss_prob: f64,
    /// Burst length range, in datagrams
    pub burst_length: (u32, u32),
    /// Chance that a datagram overtakes earlier ones
    pub reorder_prob: f64,
    /// How far back, in hub steps, an overtaking datagram may jump
    pub reorder_depth: u32,
    pub duplicate_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(40),
            jitter: JitterDistribution::Uniform {
                min_ms: 0,
                max_ms: 30,
            },
            loss_rate: 0.01,
            burst_loss_prob: 0.005,
            burst_length: (2, 5),
            reorder_prob: 0.05,
            reorder_depth: 3,
            duplicate_prob: 0.01,
        }
    }
}

impl ChaosConfig {
    /// No impairment at all, only the hub step delay
    pub fn clean() -> Self {
        ChaosConfig {
            base_latency: Duration::ZERO,
            jitter: JitterDistribution::None,
            loss_rate: 0.0,
            burst_loss_prob: 0.0,
            burst_length: (0, 0),
            reorder_prob: 0.0,
            reorder_depth: 0,
            duplicate_prob: 0.0,
        }
    }

    /// Same-site classroom Wi-Fi
    pub fn good() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(10),
            jitter: JitterDistribution::Uniform {
                min_ms: 0,
                max_ms: 10,
            },
            loss_rate: 0.001,
            burst_loss_prob: 0.001,
            burst_length: (1, 2),
            reorder_prob: 0.01,
            reorder_depth: 2,
            duplicate_prob: 0.001,
        }
    }

    /// Remote students on congested home links
    pub fn poor() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(80),
            jitter: JitterDistribution::Pareto {
                scale_ms: 20.0,
                shape: 1.5,
            },
            loss_rate: 0.05,
            burst_loss_prob: 0.01,
            burst_length: (3, 8),
            reorder_prob: 0.1,
            reorder_depth: 5,
            duplicate_prob: 0.02,
        }
    }

    /// Mobile hotspot on a moving train
    pub fn hostile() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(150),
            jitter: JitterDistribution::Pareto {
                scale_ms: 50.0,
                shape: 1.2,
            },
            loss_rate: 0.12,
            burst_loss_prob: 0.03,
            burst_length: (5, 15),
            reorder_prob: 0.2,
            reorder_depth: 10,
            duplicate_prob: 0.05,
        }
    }
}

/// Chaos statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChaosStats {
    pub submitted: u64,
    pub delivered: u64,
    pub lost: u64,
    pub reordered: u64,
    pub duplicated: u64,
    pub total_latency_ms: u64,
    pub max_latency_ms: u64,
}

impl ChaosStats {
    pub fn loss_rate(&self) -> f64 {
        if self.submitted == 0 {
            0.0
        } else {
            self.lost as f64 / self.submitted as f64
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.delivered == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.delivered as f64
        }
    }
}

#[derive(Debug)]
struct InFlight {
    deliver_at: Duration,
    sent_at: Duration,
    order: u64,
    datagram: Datagram,
}

/// Seeded link conditioner for a `LoopbackHub`.
///
/// Every datagram is held for at least one hub step. `step_size` must match
/// the `dt` the hub is advanced by, since the conditioner keeps its own clock.
pub struct ChaosLink {
    config: ChaosConfig,
    rng: StdRng,
    step_size: Duration,
    now: Duration,
    in_flight: Vec<InFlight>,
    burst_remaining: u32,
    next_order: u64,
    stats: ChaosStats,
}

impl ChaosLink {
    pub fn new(config: ChaosConfig, seed: u64, step_size: Duration) -> Self {
        ChaosLink {
            config,
            rng: StdRng::seed_from_u64(seed),
            step_size,
            now: Duration::ZERO,
            in_flight: Vec::new(),
            burst_remaining: 0,
            next_order: 0,
            stats: ChaosStats::default(),
        }
    }

    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn should_drop(&mut self) -> bool {
        if self.burst_remaining > 0 {
            self.burst_remaining -= 1;
            return true;
        }
        if self.rng.gen::<f64>() < self.config.burst_loss_prob {
            let (min, max) = self.config.burst_length;
            self.burst_remaining = self.rng.gen_range(min..=max.max(min)).saturating_sub(1);
            return true;
        }
        self.rng.gen::<f64>() < self.config.loss_rate
    }

    fn hold(&mut self, deliver_at: Duration, datagram: Datagram) {
        let order = self.next_order;
        self.next_order += 1;
        self.in_flight.push(InFlight {
            deliver_at,
            sent_at: self.now,
            order,
            datagram,
        });
    }
}

impl LinkConditioner for ChaosLink {
    fn submit(&mut self, datagram: Datagram) -> Vec<Datagram> {
        self.stats.submitted += 1;
        if self.should_drop() {
            self.stats.lost += 1;
            trace!(from = %datagram.from, to = %datagram.to, "chaos dropped datagram");
            return Vec::new();
        }

        let jitter = self.config.jitter.sample(&mut self.rng);
        let mut deliver_at = self.now + self.config.base_latency + jitter;
        if self.config.reorder_depth > 0 && self.rng.gen::<f64>() < self.config.reorder_prob {
            let jump = self.rng.gen_range(1..=self.config.reorder_depth);
            deliver_at = deliver_at.saturating_sub(self.step_size * jump).max(self.now);
            self.stats.reordered += 1;
        }

        if self.rng.gen::<f64>() < self.config.duplicate_prob {
            let lag = self.config.jitter.sample(&mut self.rng) + self.step_size;
            self.hold(deliver_at + lag, datagram.clone());
            self.stats.duplicated += 1;
        }
        self.hold(deliver_at, datagram);
        Vec::new()
    }

    fn step(&mut self) -> Vec<Datagram> {
        self.now += self.step_size;
        let now = self.now;
        let (mut due, held): (Vec<InFlight>, Vec<InFlight>) =
            self.in_flight.drain(..).partition(|p| p.deliver_at <= now);
        self.in_flight = held;
        due.sort_by_key(|p| (p.deliver_at, p.order));

        due.into_iter()
            .map(|packet| {
                let latency = (packet.deliver_at - packet.sent_at).as_millis() as u64;
                self.stats.delivered += 1;
                self.stats.total_latency_ms += latency;
                self.stats.max_latency_ms = self.stats.max_latency_ms.max(latency);
                packet.datagram
            })
            .collect()
    }
}
