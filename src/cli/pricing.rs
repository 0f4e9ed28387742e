//! Price lookups against the built-in table.

use agentbudget::pricing::default_pricing;
use agentbudget::PricingRegistry;

pub(crate) fn cmd_price(model: &str, input: u64, output: u64) {
    match PricingRegistry::global().calculate_llm_cost(model, input, output) {
        Some(cost) => println!(
            "{}: ${:.6} ({} input / {} output tokens)",
            model, cost, input, output
        ),
        None => println!("{}: unknown model", model),
    }
}

pub(crate) fn cmd_models() {
    let table = default_pricing();
    let mut models: Vec<_> = table.iter().collect();
    models.sort_by_key(|(name, _)| **name);

    let width = models.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    println!("{:<width$}  {:>10}  {:>10}", "MODEL", "INPUT/1M", "OUTPUT/1M");
    for (name, p) in models {
        println!(
            "{:<width$}  {:>10.3}  {:>10.3}",
            name, p.input_cost_per_million, p.output_cost_per_million
        );
    }
}
