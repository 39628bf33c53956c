//! # Graph Sample
//!
//! Runs the demo against a canned transport.
//!
//! ```bash
//! RUST_LOG=info cargo run -p graph-sample
//! RUST_LOG=debug cargo run -p graph-sample   # caching decisions too
//! ```

use graph_sample::{demo_client, demo_transport, run_demo};
use resource_graph::runtime::setup_tracing;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), String> {
    // Setup tracing once for the entire application
    setup_tracing();

    info!("Starting graph demo");

    let transport = demo_transport();
    let client = demo_client(transport.clone()).map_err(|e| e.to_string())?;

    match run_demo(&client).await {
        Ok(summary) => {
            info!(
                people = summary.people,
                pets = summary.pets,
                alice_age = %summary.alice_age,
                saved = %summary.saved_pet.ref_id(),
                "Demo finished"
            );
            info!(snapshot = %client.collection().snapshot(), "Final graph");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Demo failed");
            Err(e.to_string())
        }
    }
}
