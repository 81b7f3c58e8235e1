use crate::registry::STRATEGY_PROFILES;

pub fn run() {
    println!("\n=== STRATEGIES ===\n");
    for profile in STRATEGY_PROFILES.iter() {
        println!(
            "  {:<24} {:<4} {:<10} exit T{}  {}",
            profile.name,
            profile.timeframe,
            profile.kind.label(),
            profile.exit_tier,
            profile.description
        );
        println!("  {:<24} {}", "", profile.defaults.describe());
    }
}
