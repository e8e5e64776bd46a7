use ds_types::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("dictsweep basic usage example");

    let defaults = Configuration::new()
        .with("d", 6)
        .with("k", 12)
        .with("ensemble_size", 1)
        .with("dictionary_size_percentage", 0.05)
        .with("training_file", "enwik8.txt");

    let overrides = Configuration::new().with("ensemble_size", 10);
    let config = defaults.merge(&overrides).with_run_id("example-run-1");

    println!("Configuration sent on stdin:");
    println!("{}", config.to_json_line()?);

    // What a training program prints as its final line.
    let result = RunResult::from_json_line(r#"{"ppt": 0.42, "perplexity": 3.7}"#)?;
    for (metric, value) in result.iter() {
        println!("  {metric}: {value}");
    }

    Ok(())
}
