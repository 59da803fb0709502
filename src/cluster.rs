//! An in-process cluster of members sharing one replicated region.

use crate::region::ReplicatedRegion;
use basalt_messaging::{
    create_network, DistributionConfig, DistributionManager, LocalMembership, MemoryTransport,
    NetworkTransport, Result,
};
use std::sync::Arc;
use tracing::info;

pub struct SimulatedCluster {
    membership: Arc<LocalMembership>,
    transports: Vec<Arc<MemoryTransport>>,
    regions: Vec<ReplicatedRegion>,
    crashed: Vec<bool>,
}

impl SimulatedCluster {
    /// Start `members` fully connected members with default configuration.
    pub fn start(members: usize) -> Result<Self> {
        Self::start_with(members, DistributionConfig::default())
    }

    pub fn start_with(members: usize, config: DistributionConfig) -> Result<Self> {
        let membership = Arc::new(LocalMembership::new());
        let transports: Vec<Arc<MemoryTransport>> =
            create_network(members).into_iter().map(Arc::new).collect();

        let mut regions = Vec::with_capacity(members);
        for transport in &transports {
            membership.join(transport.local_member().clone());
            let dm = DistributionManager::new(transport.clone(), membership.clone(), config.clone())?;
            let region = ReplicatedRegion::create(&dm);
            dm.start()?;
            regions.push(region);
        }

        Ok(Self {
            membership,
            transports,
            regions,
            crashed: vec![false; members],
        })
    }

    pub fn regions(&self) -> &[ReplicatedRegion] {
        &self.regions
    }

    pub fn live_regions(&self) -> impl Iterator<Item = &ReplicatedRegion> {
        self.regions
            .iter()
            .zip(&self.crashed)
            .filter(|(_, crashed)| !**crashed)
            .map(|(region, _)| region)
    }

    /// Cut member `index` off the network, remove it from the membership
    /// and stop its manager.
    pub async fn crash(&mut self, index: usize) {
        if self.crashed[index] {
            return;
        }
        self.crashed[index] = true;

        let transport = &self.transports[index];
        transport.isolate(self.transports.iter().map(|t| t.as_ref()));
        let member = transport.local_member().clone();
        self.membership.depart(&member, true);
        self.regions[index].manager().shutdown().await;
        info!(member = %member, "member crashed");
    }

    /// Whether every live member holds the same region contents.
    pub fn converged(&self) -> bool {
        let mut live = self.live_regions();
        let Some(first) = live.next() else {
            return true;
        };
        let expected = first.snapshot();
        live.all(|region| region.snapshot() == expected)
    }

    pub async fn shutdown(&self) {
        for region in self.live_regions() {
            region.manager().shutdown().await;
        }
    }
}
