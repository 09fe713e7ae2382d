use std::path::Path;

use console::Style;
use darkroom_core::pipeline::{BatchSummary, FileOutcome, ReductionConfig};

struct Styles {
    title: Style,
    label: Style,
    value: Style,
    good: Style,
    warn: Style,
    bad: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            good: Style::new().green(),
            warn: Style::new().yellow(),
            bad: Style::new().red().bold(),
            path: Style::new().underlined(),
        }
    }
}

pub fn print_run_summary(config: &ReductionConfig, db: &Path) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Darkroom Reduction"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(18)));
    println!();
    println!(
        "  {:<14}{}",
        s.label.apply_to("Database"),
        s.path.apply_to(db.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Output"),
        s.path.apply_to(config.processing.processed_path.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Max tries"),
        s.value.apply_to(config.processing.max_tries)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Min images"),
        s.value.apply_to(config.calibration.min_images)
    );
    let astrometry = if config.astrometry.url.is_empty() {
        s.warn.apply_to("disabled".to_string())
    } else {
        s.good.apply_to(config.astrometry.url.clone())
    };
    println!("  {:<14}{}", s.label.apply_to("Astrometry"), astrometry);
    println!(
        "  {:<14}{}",
        s.label.apply_to("Detection"),
        s.value.apply_to(format!(
            "{} sigma, {} px minimum",
            config.detection.threshold_sigma, config.detection.min_area
        ))
    );
    println!();
}

pub fn print_batch_summary(summary: &BatchSummary) {
    let s = Styles::new();

    println!();
    for (path, outcome) in &summary.outcomes {
        match outcome {
            FileOutcome::Reduced { output, is_bad: false } => println!(
                "  {} {} -> {}",
                s.good.apply_to("ok  "),
                path.display(),
                s.path.apply_to(output.display())
            ),
            FileOutcome::Reduced { output, is_bad: true } => println!(
                "  {} {} -> {}",
                s.warn.apply_to("bad "),
                path.display(),
                s.path.apply_to(output.display())
            ),
            FileOutcome::Skipped => {
                println!("  {} {}", s.label.apply_to("skip"), path.display())
            }
            FileOutcome::Failed(reason) => println!(
                "  {} {}: {}",
                s.bad.apply_to("FAIL"),
                path.display(),
                reason
            ),
        }
    }
    println!();
    println!(
        "  {:<14}{}  {:<10}{}  {:<10}{}",
        s.label.apply_to("Reduced"),
        s.good.apply_to(summary.reduced()),
        s.label.apply_to("Skipped"),
        s.value.apply_to(summary.skipped()),
        s.label.apply_to("Failed"),
        s.bad.apply_to(summary.failed()),
    );
}
