//! Simulation lifecycle.
//!
//! Builds one in-process session of several peers, each with its own
//! [`ReplicationGroup`] and [`TypedMessageRouter`], and drives them at the
//! configured tick rate. Peer 0 owns a lap counter, a chat stream and a car
//! transform; every other peer observes them.

use crate::cli::CliArgs;
use crate::config::SimConfig;
use crate::logging::display_banner;
use crate::signals::wait_for_shutdown;
use anyhow::{Context, Result};
use peer_replication::{
    LoopbackNetwork, MessageStreamReplicator, NetworkedField, Origin, Origins, PeerId, Quat,
    ReplicationDescriptor, ReplicationGroup, ReplicatorHandle, RouterStats, SharedDescriptor,
    TickReport, Transform, TransformBroadcastPacker, TransformPieces, TransportMode,
    TypedMessageRouter, Vec3,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Wire tag of [`Ping`] on the router channel.
pub const PING_TAG: u32 = 7;

/// Positions closer than this count as converged.
const POSITION_EPSILON: f64 = 1e-9;

/// Ad hoc router message sent by the owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub seq: u64,
}

/// Stream message sent by the owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatLine {
    pub seq: u64,
    pub text: String,
}

struct SimPeer {
    id: PeerId,
    group: ReplicationGroup,
    router: Arc<TypedMessageRouter>,
    laps: ReplicatorHandle<NetworkedField<u64>>,
    chat: ReplicatorHandle<MessageStreamReplicator<ChatLine>>,
    car: ReplicatorHandle<TransformBroadcastPacker>,
    pings_received: Arc<AtomicU64>,
    chat_received: Arc<AtomicU64>,
}

/// Final state of one peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerSummary {
    pub peer: PeerId,
    pub laps: Option<u64>,
    pub car_position: Vec3,
    pub chat_received: u64,
    pub pings_received: u64,
    pub router: RouterStats,
}

/// Totals across every peer and tick.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SessionTotals {
    pub ticks: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub inbound_applied: u64,
    pub inbound_dropped: u64,
    pub errors: u64,
}

impl SessionTotals {
    fn add(&mut self, report: &TickReport) {
        self.packets_sent += report.packets_sent;
        self.bytes_sent += report.bytes_sent;
        self.inbound_applied += report.inbound_applied;
        self.inbound_dropped += report.inbound_dropped;
        self.errors += report.errors;
    }
}

/// An in-process replication session.
pub struct Simulation {
    config: SimConfig,
    replication_network: LoopbackNetwork,
    router_network: LoopbackNetwork,
    descriptor: SharedDescriptor,
    peers: Vec<SimPeer>,
    chat_sent: u64,
    pings_sent: u64,
    totals: SessionTotals,
}

impl Simulation {
    /// Builds the session described by `config`. The configuration must
    /// already be validated.
    pub fn new(config: SimConfig) -> Result<Self> {
        // Router tags and replicator ids would collide on a shared channel
        let replication_network = LoopbackNetwork::new();
        let router_network = LoopbackNetwork::new();

        let ids: Vec<PeerId> = (0..config.simulation.peers).map(|_| PeerId::new()).collect();
        let owner = ids[0];
        let late_joiner = ids[ids.len() - 1];
        let receivers = ids
            .iter()
            .copied()
            .filter(|&peer| peer != owner)
            .filter(|&peer| peer != late_joiner || config.simulation.late_join_tick == 0);
        let descriptor = SharedDescriptor::owned_by(owner, receivers, TransportMode::RELIABLE_ORDERED);

        let mut peers = Vec::with_capacity(ids.len());
        for &id in &ids {
            peers.push(Self::build_peer(id, &ids, &config, &descriptor, &replication_network, &router_network)?);
        }

        info!(
            "🏗️ Session ready: {} peers, owner {}, late joiner {}",
            ids.len(),
            owner,
            late_joiner
        );

        Ok(Self {
            config,
            replication_network,
            router_network,
            descriptor,
            peers,
            chat_sent: 0,
            pings_sent: 0,
            totals: SessionTotals::default(),
        })
    }

    fn build_peer(
        id: PeerId,
        all: &[PeerId],
        config: &SimConfig,
        descriptor: &SharedDescriptor,
        replication_network: &LoopbackNetwork,
        router_network: &LoopbackNetwork,
    ) -> Result<SimPeer> {
        let mut group = ReplicationGroup::new(
            Arc::new(replication_network.endpoint(id)),
            config.replication.clone(),
        );
        replication_network.attach(id, Arc::new(group.inbound_sender()));
        for &other in all {
            group.peer_added(other);
        }

        let shared: Arc<dyn ReplicationDescriptor> = Arc::new(descriptor.clone());

        let laps = group.register(NetworkedField::<u64>::new("laps", shared.clone(), id));

        let chat_received = Arc::new(AtomicU64::new(0));
        let mut stream = MessageStreamReplicator::<ChatLine>::new("chat", shared.clone(), id, &config.replication);
        {
            let chat_received = chat_received.clone();
            stream.on_message_received(move |line: &ChatLine, from| {
                debug!("💬 {} received chat #{} from {}: {}", id, line.seq, from, line.text);
                chat_received.fetch_add(1, Ordering::Relaxed);
            });
        }
        let chat = group.register(stream);

        let car = group.register(TransformBroadcastPacker::new(
            "car",
            shared,
            id,
            TransformPieces::all(),
            Transform::default(),
        ));

        let router = Arc::new(TypedMessageRouter::new(Arc::new(router_network.endpoint(id))));
        router
            .register_type::<Ping>(PING_TAG)
            .context("failed to register Ping")?;
        let pings_received = Arc::new(AtomicU64::new(0));
        {
            let pings_received = pings_received.clone();
            // The unregisterer is dropped; the handler lives as long as the router
            router
                .register_handler(
                    move |ping: Ping, origin: Origin| {
                        debug!("🏓 {} got ping #{} from {}", id, ping.seq, origin);
                        pings_received.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    },
                    Origins::PEER,
                )
                .context("failed to register Ping handler")?;
        }
        {
            let router = router.clone();
            router_network.attach(
                id,
                Arc::new(move |tag: u32, bytes: &[u8], origin: Origin, _mode: TransportMode| {
                    router.dispatch(tag, bytes, origin);
                }),
            );
        }

        Ok(SimPeer {
            id,
            group,
            router,
            laps,
            chat,
            car,
            pings_received,
            chat_received,
        })
    }

    pub fn owner(&self) -> PeerId {
        self.peers[0].id
    }

    pub fn totals(&self) -> &SessionTotals {
        &self.totals
    }

    /// Advances the session by one tick: the owner mutates its state, then
    /// every peer's group ticks.
    pub fn step(&mut self) {
        let tick = self.totals.ticks + 1;
        let simulation = &self.config.simulation;

        if tick == simulation.late_join_tick {
            let late_joiner = self.peers[self.peers.len() - 1].id;
            if self.descriptor.add_receiver(late_joiner) {
                info!("👋 Peer {} became a receiver at tick {}", late_joiner, tick);
            }
        }

        let all: Vec<PeerId> = self.peers.iter().map(|peer| peer.id).collect();
        let (ping_due, chat_due) = (tick % simulation.ping_interval == 0, tick % simulation.chat_interval == 0);
        let owner = &mut self.peers[0];

        if let Some(laps) = owner.group.get_mut(owner.laps) {
            let lap = tick / 60;
            if let Err(e) = laps.set_value(Some(lap)) {
                warn!("Owner could not update laps: {}", e);
            }
        }

        if let Some(car) = owner.group.get_mut(owner.car) {
            let angle = tick as f64 * 0.05;
            car.set_position(Vec3::new(angle.cos() * 10.0, 0.0, angle.sin() * 10.0));
            car.set_rotation(Quat::from_rotation_y(angle));
        }

        if chat_due {
            self.chat_sent += 1;
            if let Some(chat) = owner.group.get_mut(owner.chat) {
                chat.send_message(
                    ChatLine {
                        seq: self.chat_sent,
                        text: format!("lap update at tick {tick}"),
                    },
                    &all,
                );
            }
        }

        if ping_due {
            self.pings_sent += 1;
            if let Err(e) = owner.router.send(&Ping { seq: self.pings_sent }, &all[1..], false) {
                warn!("Ping #{} failed: {}", self.pings_sent, e);
            }
        }

        self.tick_groups();
    }

    /// Ticks every group without mutating anything, so in-flight state lands.
    pub fn settle(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.tick_groups();
        }
    }

    fn tick_groups(&mut self) {
        self.totals.ticks += 1;
        for peer in &mut self.peers {
            let report = peer.group.tick();
            self.totals.add(&report);
        }
    }

    /// Per-peer final state, owner first.
    pub fn summary(&self) -> Vec<PeerSummary> {
        self.peers
            .iter()
            .map(|peer| PeerSummary {
                peer: peer.id,
                laps: peer
                    .group
                    .get(peer.laps)
                    .and_then(|laps| laps.value().copied()),
                car_position: peer
                    .group
                    .get(peer.car)
                    .map(|car| car.transform().position)
                    .unwrap_or_else(Vec3::zero),
                chat_received: peer.chat_received.load(Ordering::Relaxed),
                pings_received: peer.pings_received.load(Ordering::Relaxed),
                router: peer.router.stats(),
            })
            .collect()
    }

    /// Peers whose replicated state differs from the owner's.
    pub fn diverged_peers(&self) -> Vec<PeerId> {
        let summary = self.summary();
        let Some((owner, observers)) = summary.split_first() else {
            return Vec::new();
        };
        observers
            .iter()
            .filter(|peer| {
                peer.laps != owner.laps
                    || peer.car_position.distance(owner.car_position) > POSITION_EPSILON
                    || peer.chat_received != owner.chat_received
            })
            .map(|peer| peer.peer)
            .collect()
    }

    /// Runs the configured number of ticks at the configured rate, stopping
    /// early on a shutdown signal.
    pub async fn run(&mut self) -> Result<()> {
        let total = self.config.simulation.ticks;
        let rate = self.config.replication.tick_rate_hz.round().max(1.0) as u64;

        let mut interval = tokio::time::interval(self.config.replication.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let shutdown = wait_for_shutdown();
        tokio::pin!(shutdown);

        info!("🚀 Running {} ticks at {} Hz", total, self.config.replication.tick_rate_hz);
        while self.totals.ticks < total {
            tokio::select! {
                _ = interval.tick() => {
                    self.step();
                    if self.totals.ticks % rate == 0 {
                        info!(
                            "📊 Tick {} - {} packets ({} bytes) sent, {} applied, {} dropped",
                            self.totals.ticks,
                            self.totals.packets_sent,
                            self.totals.bytes_sent,
                            self.totals.inbound_applied,
                            self.totals.inbound_dropped,
                        );
                    }
                }
                result = &mut shutdown => {
                    result?;
                    info!("🛑 Stopping simulation at tick {}", self.totals.ticks);
                    break;
                }
            }
        }

        self.settle(2);
        Ok(())
    }

    /// Logs the final state and closes both networks.
    pub fn shutdown(self) {
        info!("📊 Final session state after {} ticks:", self.totals.ticks);
        info!(
            "  - Sent {} packets ({} bytes), applied {}, dropped {}, errors {}",
            self.totals.packets_sent,
            self.totals.bytes_sent,
            self.totals.inbound_applied,
            self.totals.inbound_dropped,
            self.totals.errors
        );
        info!("  - Owner sent {} chat lines and {} pings", self.chat_sent, self.pings_sent);
        for peer in self.summary() {
            info!(
                "  - {}: laps={:?} car=({:.2}, {:.2}, {:.2}) chat={} pings={} router_dropped={}",
                peer.peer,
                peer.laps,
                peer.car_position.x,
                peer.car_position.y,
                peer.car_position.z,
                peer.chat_received,
                peer.pings_received,
                peer.router.total_dropped()
            );
        }

        let diverged = self.diverged_peers();
        if diverged.is_empty() {
            info!("✅ All peers converged");
        } else {
            warn!("⚠️ {} peer(s) diverged from the owner: {:?}", diverged.len(), diverged);
        }

        // Sinks hold routers and routers hold endpoints; closing breaks the cycle
        self.replication_network.close();
        self.router_network.close();
        info!("👋 Simulation finished");
    }
}

/// Loads configuration, applies CLI overrides and runs a simulation.
pub struct Application {
    config: SimConfig,
}

impl Application {
    /// Builds the effective configuration from the file and CLI overrides.
    pub async fn new(args: CliArgs) -> Result<Self> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = SimConfig::load_from_file(&args.config_path).await?;

        if let Some(peers) = args.peers {
            config.simulation.peers = peers;
        }
        if let Some(ticks) = args.ticks {
            config.simulation.ticks = ticks;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        config.validate().context("configuration validation failed")?;
        info!("✅ Configuration loaded and validated successfully");

        Ok(Self { config })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub async fn run(self) -> Result<()> {
        display_banner();
        let mut simulation = Simulation::new(self.config)?;
        simulation.run().await?;
        simulation.shutdown();
        Ok(())
    }
}
