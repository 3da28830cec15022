//! Command-line surface around the scoring pipeline.
//!
//! This binary is the surrounding application, not part of the core: it owns
//! input collection (seven range-constrained flags, the CLI analog of the
//! clinical intake form) and rendering (the headline percentage plus a text
//! waterfall of the attribution). The model artifact is loaded exactly once
//! here and the pipeline is used for the rest of the invocation.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use strokevap::model::Forest;
use strokevap::observation::{self, PatientObservation};
use strokevap::pipeline::{RiskAssessment, RiskPipeline};

#[derive(Parser)]
#[command(
    name = "strokevap",
    about = "Ventilator-associated pneumonia risk scoring for ischemic-stroke patients",
    long_about = "Scores one mechanically-ventilated ischemic-stroke patient for the risk of \
                  developing ventilator-associated pneumonia, and explains which clinical \
                  measurements pushed the score up or down."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score one patient and explain the result
    Score {
        /// Path to the trained model artifact (.toml)
        #[arg(long)]
        model: PathBuf,

        /// Systolic blood pressure, mmHg
        #[arg(long, value_parser = clap::value_parser!(u16).range(60..=200))]
        sbp: u16,

        /// Diastolic blood pressure, mmHg
        #[arg(long, value_parser = clap::value_parser!(u16).range(30..=120))]
        dbp: u16,

        /// International normalized ratio
        #[arg(long, value_parser = parse_inr)]
        inr: f64,

        /// Length of hospital stay before mechanical ventilation, days
        #[arg(long, value_parser = clap::value_parser!(u16).range(0..=31))]
        los_before_mv: u16,

        /// Number of antibiotic uses
        #[arg(long, value_parser = clap::value_parser!(u16).range(0..=10))]
        antibiotic_counts: u16,

        /// Number of suctioning procedures
        #[arg(long, value_parser = clap::value_parser!(u16).range(0..=15))]
        suctioning_counts: u16,

        /// Dysphagia present (0 or 1)
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
        dysphagia: u8,
    },

    /// Summarize a model artifact without scoring anything
    Inspect {
        /// Path to the trained model artifact (.toml)
        #[arg(long)]
        model: PathBuf,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Score {
            model,
            sbp,
            dbp,
            inr,
            los_before_mv,
            antibiotic_counts,
            suctioning_counts,
            dysphagia,
        } => score_command(
            &model,
            PatientObservation {
                sbp,
                dbp,
                inr,
                los_before_mv,
                antibiotic_counts,
                suctioning_counts,
                dysphagia: dysphagia == 1,
            },
        ),
        Commands::Inspect { model } => inspect_command(&model),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// The INR form field allows one decimal in [0.5, 7.0]; anything else is
/// rejected before an observation is ever constructed.
fn parse_inr(text: &str) -> Result<f64, String> {
    let value: f64 = text
        .parse()
        .map_err(|_| format!("'{text}' is not a number"))?;
    if !value.is_finite() || !observation::INR_RANGE.contains(&value) {
        return Err(format!(
            "{value} is outside the valid range [{}, {}]",
            observation::INR_RANGE.start(),
            observation::INR_RANGE.end()
        ));
    }
    Ok(value)
}

fn score_command(
    model_path: &std::path::Path,
    observation: PatientObservation,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = RiskPipeline::from_artifact(model_path)?;
    let assessment = pipeline.score(&observation)?;
    render(&assessment);
    Ok(())
}

/// Text analog of a force plot: the headline percentage, then each feature's
/// signed push away from the baseline, largest magnitude first.
fn render(assessment: &RiskAssessment) {
    println!(
        "Estimated risk of ventilator-associated pneumonia: {:.2}%",
        assessment.risk_percent
    );
    println!();
    println!(
        "How the inputs shifted the model's probability (baseline {:.4}):",
        assessment.attribution.baseline
    );

    let mut entries: Vec<_> = assessment.attribution.entries.iter().collect();
    entries.sort_by(|a, b| {
        b.contribution
            .abs()
            .partial_cmp(&a.contribution.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let name_width = entries
        .iter()
        .map(|entry| entry.feature.len())
        .max()
        .unwrap_or(0);
    for entry in entries {
        println!(
            "  {:<name_width$}  = {:<6}  {:+.4}",
            entry.feature, entry.observed, entry.contribution
        );
    }
    println!();
    println!("Model probability: {:.4}", assessment.raw_score);
}

fn inspect_command(model_path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let forest = Forest::load(model_path)?;
    println!("Model artifact: {}", model_path.display());
    println!("  trees:    {}", forest.tree_count());
    println!("  nodes:    {}", forest.node_count());
    println!("  features: {}", forest.feature_names().join(", "));
    println!("  expected positive-class probability: {:.4}", forest.expected_value());
    Ok(())
}
