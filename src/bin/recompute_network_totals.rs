//! Maintenance: recompute each participant's stored per-month network-cost
//! totals from the seven components and fix any drift.
//!
//! Usage: DATABASE_URL=postgres://... cargo run --bin recompute_network_totals

use community_energy_api::models::Participant;
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt::init();

    let database_url = std::env::var("DB_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("DB_URL or DATABASE_URL required"))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let participants =
        sqlx::query_as::<_, Participant>("SELECT * FROM participants ORDER BY created_at ASC")
            .fetch_all(&pool)
            .await?;

    println!("Checking {} participant(s)...", participants.len());

    let mut fixed = 0usize;
    let mut checked = 0usize;

    for participant in &participants {
        let mut billing = participant.billing_data();
        let mut dirty = false;

        for (month, costs) in billing.months.iter_mut() {
            checked += 1;
            let computed = costs.component_sum();
            if (computed - costs.total).abs() > 0.005 {
                println!(
                    "  {} {} {}: stored total {:.2} != component sum {:.2}",
                    participant.name, participant.ean, month, costs.total, computed
                );
                costs.total = computed;
                dirty = true;
            }
        }

        if dirty {
            sqlx::query(
                "UPDATE participants SET billing_data = $2, updated_at = now() WHERE id = $1",
            )
            .bind(participant.id)
            .bind(billing.to_value())
            .execute(&pool)
            .await?;
            fixed += 1;
        }
    }

    println!(
        "Done: {} month entries checked, {} participant(s) corrected",
        checked, fixed
    );

    Ok(())
}
