use log::info;

use multiple_access::{replicate, SimConfig, Simulation};

const NUM_REPLICATIONS: usize = 3;

fn main() {
    env_logger::init();
    info!("... multiple access simulator is started ...");

    for config in [SimConfig::slotted_aloha(), SimConfig::slotted_retransmit()] {
        match Simulation::new(config) {
            Ok(mut sim) => {
                let snapshot = sim.run();
                info!(
                    "generated {}, delivered {}, success rate {:.2}%, throughput {:.4}/slot, mean delay {:.4}",
                    snapshot.generated,
                    snapshot.successes,
                    snapshot.success_rate * 100.0,
                    snapshot.slot_throughput,
                    snapshot.mean_delay
                );
            }
            Err(e) => log::error!("{}", e),
        }
    }

    match replicate(&SimConfig::csma(), NUM_REPLICATIONS) {
        Ok(summary) => {
            for (r, snapshot) in summary.snapshots.iter().enumerate() {
                for node in snapshot.nodes.iter() {
                    info!(
                        "replication {} station {}: mean transmit time {:.4}, mean retries {:.4}, utilization {:.2}%",
                        r + 1,
                        node.id,
                        node.mean_delay,
                        node.mean_retries,
                        node.utilization * 100.0
                    );
                }
            }
            info!(
                "over {} replications: mean transmit time {:.4}, mean retries {:.4}, channel utilization {:.2}%",
                summary.replications,
                summary.mean_delay,
                summary.mean_retries,
                summary.utilization * 100.0
            );
        }
        Err(e) => log::error!("{}", e),
    }
}
