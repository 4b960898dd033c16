//! End-to-end tests driving several replication groups over a loopback network

#[cfg(test)]
mod scenarios;

#[cfg(test)]
pub(crate) mod harness {
    use crate::config::ReplicationConfig;
    use crate::replication::{ReplicationGroup, TickReport};
    use crate::transport::LoopbackNetwork;
    use crate::types::PeerId;
    use std::sync::Arc;

    /// A set of peers, each with its own group, joined on one loopback network.
    pub(crate) struct Session {
        pub(crate) network: LoopbackNetwork,
        pub(crate) peers: Vec<PeerId>,
        pub(crate) groups: Vec<ReplicationGroup>,
    }

    impl Session {
        pub(crate) fn new(peer_count: usize) -> Self {
            Self::with_config(peer_count, ReplicationConfig::default())
        }

        pub(crate) fn with_config(peer_count: usize, config: ReplicationConfig) -> Self {
            let network = LoopbackNetwork::new();
            let peers: Vec<PeerId> = (0..peer_count).map(|_| PeerId::new()).collect();

            let mut groups: Vec<ReplicationGroup> = peers
                .iter()
                .map(|&peer| {
                    let group = ReplicationGroup::new(Arc::new(network.endpoint(peer)), config.clone());
                    network.attach(peer, Arc::new(group.inbound_sender()));
                    group
                })
                .collect();

            for group in &mut groups {
                for &peer in &peers {
                    group.peer_added(peer);
                }
            }

            Self {
                network,
                peers,
                groups,
            }
        }

        /// Ticks every group once, in peer order.
        pub(crate) fn tick(&mut self) -> Vec<TickReport> {
            self.groups.iter_mut().map(|group| group.tick()).collect()
        }

        pub(crate) fn tick_n(&mut self, n: usize) {
            for _ in 0..n {
                self.tick();
            }
        }
    }
}
