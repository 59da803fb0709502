use stress_test::{stress_test_departure, stress_test_replication, stress_test_scaling};
use tracing_subscriber::EnvFilter;

pub mod cluster;
pub mod region;
pub mod stress_test;
pub mod update;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn std::error::Error>> {

    // Run async stress tests
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            REPLICATED REGION STRESS TESTS                   ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Test 1: small cluster
    let stats = stress_test_replication(3, 200, 16).await?;
    stats.print();

    // Test 2: medium cluster
    let stats = stress_test_replication(8, 500, 32).await?;
    stats.print();

    // Test 3: member crash halfway through
    let stats = stress_test_departure(5, 400, 16).await?;
    stats.print();

    // Test 4: Scaling analysis
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS                                   ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    stress_test_scaling(12, 3).await?;

    println!("\n✓ All stress tests completed successfully!");
    Ok(())
}
