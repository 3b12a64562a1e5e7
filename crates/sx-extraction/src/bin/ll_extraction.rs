use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sx_extraction::{build_driver, ExperimentConfig, ExtractionDriver};
use sx_types::DriverError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ExperimentConfig::from_env().context("loading configuration")?;
    let mut driver = build_driver(&config).await.context("setting up experiment")?;

    let run = driver.run().await;
    match &run {
        Ok(report) => info!(
            completed = report.trials_completed,
            failed = report.trials_failed,
            "optimization finished"
        ),
        Err(DriverError::Trial(failure)) => error!(
            trial_index = failure.trial_index,
            kind = failure.error.kind(),
            "run stopped on failed trial; showing partial history"
        ),
        Err(err) => error!(error = %err, "run aborted; showing partial history"),
    }

    print_results(&driver);

    if let Some(path) = config.summary_path() {
        driver
            .results()
            .summary()
            .write_csv(&path)
            .with_context(|| format!("writing summary to {}", path.display()))?;
        info!(path = %path.display(), "wrote trial summary");
    }

    run?;
    Ok(())
}

fn print_results(driver: &ExtractionDriver) {
    println!("\nResults summary:");
    println!("{}", driver.results().summary());

    let best = match driver.best() {
        Ok(best) => best,
        Err(err) => {
            warn!(error = %err, "no best parameters available");
            return;
        }
    };
    let definition = driver.state().definition();

    println!("Best parameters (trial {}):", best.trial_index);
    for name in definition.space().names() {
        if let Some(value) = best.parameterization.get(name) {
            println!("{name}: {value}");
        }
    }

    let derived: Vec<&str> = definition.rules().produced().collect();
    if !derived.is_empty() {
        println!("\nDerived parameter:");
        for name in derived {
            if let Some(value) = best.parameterization.get(name) {
                println!("{name}: {value}");
            }
        }
    }

    println!("\nBest outcomes:");
    for (metric, value) in &best.values {
        println!("{metric}: {value}");
    }
    if !best.meets_thresholds {
        println!("(best trial does not meet every objective threshold)");
    }
}
