use crate::cluster::SimulatedCluster;
use crate::region::{ReplicatedRegion, Result};
use async_stream::stream;
use basalt_delta::now_millis;
use bytes::Bytes;
use futures::stream::Stream;
use futures::stream::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Statistics collected during stress testing
#[derive(Clone, Debug)]
pub struct StressTestStats {
    pub num_members: usize,
    pub operations_per_member: usize,
    pub total_updates: usize,
    pub full_value_resends: u64,
    pub total_time: Duration,
    pub avg_update_time: Duration,
    pub ops_per_second: f64,
    pub converged: bool,
}

impl StressTestStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Stress Test Statistics                         ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Number of Members:         {:>38} ║", self.num_members);
        println!("║  Operations per Member:     {:>38} ║", self.operations_per_member);
        println!("║  Replicated Updates:        {:>38} ║", self.total_updates);
        println!("║  Full Value Resends:        {:>38} ║", self.full_value_resends);
        println!("║  Total Time:                {:>39}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Average Update Time:       {:>36}µs ║", format!("{:.2}", self.avg_update_time.as_micros()));
        println!("║  Operations/Second:         {:>38.0} ║", self.ops_per_second);
        println!("║  Converged:                 {:>38} ║", self.converged);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

/// One region write issued by the generator.
#[derive(Clone, Debug)]
enum RegionOp {
    SAdd(Bytes, Bytes),
    SRem(Bytes, Bytes),
    Append(Bytes, Bytes),
    ZAdd(Bytes, Bytes, f64),
    Expire(Bytes),
    Persist(Bytes),
    Del(Bytes),
}

/// Generator that yields random writes over the keys owned by one member
fn region_op_generator(owner: usize, num_keys: usize, num_ops: usize) -> impl Stream<Item = RegionOp> {
    stream! {
        let mut rng = StdRng::from_entropy();
        for _ in 0..num_ops {
            let slot = rng.gen_range(0..num_keys);
            let member = Bytes::from(format!("m{}", rng.gen_range(0..32)));
            let op = match rng.gen_range(0..100) {
                0..=34 => RegionOp::SAdd(Bytes::from(format!("set:{}:{}", owner, slot)), member),
                35..=49 => RegionOp::SRem(Bytes::from(format!("set:{}:{}", owner, slot)), member),
                50..=69 => RegionOp::Append(Bytes::from(format!("log:{}:{}", owner, slot)), member),
                70..=89 => {
                    let score = rng.gen_range(0.0..1000.0);
                    RegionOp::ZAdd(Bytes::from(format!("rank:{}:{}", owner, slot)), member, score)
                }
                90..=94 => RegionOp::Expire(Bytes::from(format!("set:{}:{}", owner, slot))),
                95..=97 => RegionOp::Persist(Bytes::from(format!("set:{}:{}", owner, slot))),
                _ => RegionOp::Del(Bytes::from(format!("log:{}:{}", owner, slot))),
            };
            yield op;
        }
    }
}

/// Helper function to apply one generated write and time it
async fn perform_op(
    region: &ReplicatedRegion,
    op: RegionOp,
    update_times: &mut Vec<Duration>,
) -> Result<()> {
    let update_start = Instant::now();

    match op {
        RegionOp::SAdd(key, member) => {
            region.sadd(key, vec![member]).await?;
        }
        RegionOp::SRem(key, member) => {
            region.srem(key, vec![member]).await?;
        }
        RegionOp::Append(key, value) => {
            region.append(key, value).await?;
        }
        RegionOp::ZAdd(key, member, score) => {
            region.zadd(key, vec![(member, score)]).await?;
        }
        RegionOp::Expire(key) => {
            region.pexpireat(key, now_millis() + 3_600_000).await?;
        }
        RegionOp::Persist(key) => {
            region.persist(key).await?;
        }
        RegionOp::Del(key) => {
            region.del(key).await?;
        }
    }

    update_times.push(update_start.elapsed());
    Ok(())
}

/// Run one writer per member and return the per-update latencies.
async fn run_writers(
    cluster: &SimulatedCluster,
    ops_per_member: usize,
    num_keys: usize,
) -> Vec<Duration> {
    let mut handles = vec![];
    for (owner, region) in cluster.live_regions().enumerate() {
        let region = region.clone();
        let handle = tokio::spawn(async move {
            let mut update_times = Vec::with_capacity(ops_per_member);
            let mut ops = Box::pin(region_op_generator(owner, num_keys, ops_per_member));
            let mut done = 0;
            while let Some(op) = ops.next().await {
                if let Err(e) = perform_op(&region, op, &mut update_times).await {
                    warn!(member = %region.local_member(), error = %e, "write failed");
                }
                done += 1;
                if done % 100 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            update_times
        });
        handles.push(handle);
    }

    let mut update_times = vec![];
    for handle in handles {
        match handle.await {
            Ok(times) => update_times.extend(times),
            Err(e) => warn!(error = %e, "writer task failed"),
        }
    }
    update_times
}

fn collect_stats(
    cluster: &SimulatedCluster,
    num_members: usize,
    ops_per_member: usize,
    update_times: &[Duration],
    total_time: Duration,
) -> StressTestStats {
    let avg_update_time = if !update_times.is_empty() {
        update_times.iter().sum::<Duration>() / update_times.len() as u32
    } else {
        Duration::ZERO
    };
    let ops_per_second = update_times.len() as f64 / total_time.as_secs_f64();

    StressTestStats {
        num_members,
        operations_per_member: ops_per_member,
        total_updates: update_times.len(),
        full_value_resends: cluster.regions().iter().map(|r| r.full_resends()).sum(),
        total_time,
        avg_update_time,
        ops_per_second,
        converged: cluster.converged(),
    }
}

/// Stress test for delta replication across a healthy cluster
pub async fn stress_test_replication(
    num_members: usize,
    ops_per_member: usize,
    num_keys: usize,
) -> Result<StressTestStats> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Replicated Region Stress Test                       ║");
    println!("║  Members: {} | Ops/Member: {} | Keys/Member: {} ║",
             num_members, ops_per_member, num_keys);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let cluster = SimulatedCluster::start(num_members)?;

    println!("\n[Phase 1/2] Writing to owned keys...");
    let update_times = run_writers(&cluster, ops_per_member, num_keys).await;
    println!("[Phase 1/2] ✓ Completed");

    println!("[Phase 2/2] Checking convergence...");
    let stats = collect_stats(&cluster, num_members, ops_per_member, &update_times, start.elapsed());
    println!("[Phase 2/2] ✓ Completed");

    cluster.shutdown().await;
    Ok(stats)
}

/// Stress test where one member crashes between two rounds of writes
pub async fn stress_test_departure(
    num_members: usize,
    ops_per_member: usize,
    num_keys: usize,
) -> Result<StressTestStats> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Member Departure Stress Test                        ║");
    println!("║  Members: {} | Ops/Member: {} | Keys/Member: {} ║",
             num_members, ops_per_member, num_keys);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let mut cluster = SimulatedCluster::start(num_members)?;

    println!("\n[Phase 1/3] Writing before departure...");
    let mut update_times = run_writers(&cluster, ops_per_member / 2, num_keys).await;
    println!("[Phase 1/3] ✓ Completed");

    println!("[Phase 2/3] Crashing the last member...");
    cluster.crash(num_members - 1).await;
    println!("[Phase 2/3] ✓ Completed");

    println!("[Phase 3/3] Writing after departure...");
    update_times.extend(run_writers(&cluster, ops_per_member / 2, num_keys).await);
    println!("[Phase 3/3] ✓ Completed");

    let stats = collect_stats(&cluster, num_members, ops_per_member, &update_times, start.elapsed());
    info!(converged = stats.converged, "departure stress test finished");

    cluster.shutdown().await;
    Ok(stats)
}

/// Stress test comparing different cluster sizes
pub async fn stress_test_scaling(max_members: usize, step_size: usize) -> Result<()> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║      Scaling Analysis - Replication vs Members             ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut current_members = step_size;
    while current_members <= max_members {
        let stats = stress_test_replication(current_members, 50, 8).await?;
        stats.print();
        current_members += step_size;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replication_converges() {
        let stats = stress_test_replication(3, 60, 4).await.unwrap();
        assert!(stats.converged);
        assert_eq!(stats.total_updates, 180);
    }

    #[tokio::test]
    async fn test_departure_converges() {
        let stats = stress_test_departure(4, 40, 4).await.unwrap();
        assert!(stats.converged);
    }
}
