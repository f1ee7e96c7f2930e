//! `chatrelay pricing` — List known model pricing.

use chatrelay_metering::PricingTable;

pub async fn run() -> anyhow::Result<()> {
    let table = PricingTable::with_defaults();
    let models = table.models();

    println!("💰 Model Pricing (USD per 1M tokens)");
    println!("{:<24} {:>10} {:>10} {:>10}", "Model", "Input", "Cached", "Output");
    for name in &models {
        if let Some(p) = table.get(name) {
            println!(
                "{:<24} ${:>8.2} ${:>8.2} ${:>8.2}",
                name, p.input_per_m, p.cached_input_per_m, p.output_per_m
            );
        }
    }

    Ok(())
}
