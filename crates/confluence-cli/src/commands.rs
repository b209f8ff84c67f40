use anyhow::Context;
use colored::Colorize;
use serde_json::{json, Value};

use confluence_collection::Items;

use crate::cli::*;
use crate::replay::{replay, StepReport};
use crate::scenario::ScenarioConfig;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(args) => cmd_run(args, cli.format),
        Command::Check(args) => cmd_check(args, cli.format),
    }
}

fn load(path: &std::path::Path) -> anyhow::Result<ScenarioConfig> {
    ScenarioConfig::load(path).with_context(|| format!("loading scenario {}", path.display()))
}

fn cmd_run(args: RunArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = load(&args.scenario)?;
    if matches!(format, OutputFormat::Text) {
        println!(
            "{} {} ({} sources, {} steps)",
            "▶".cyan().bold(),
            display_name(&config).bold(),
            config.sources.len(),
            config.steps.len()
        );
    }

    let final_view = replay(&config, |report| {
        if !args.quiet {
            print_step(report, format);
        }
    })?;

    match format {
        OutputFormat::Text => println!("{} final view: {}", "✓".green().bold(), render(&final_view)),
        OutputFormat::Json => println!("{}", json!({ "final": final_view })),
    }
    Ok(())
}

fn cmd_check(args: CheckArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = load(&args.scenario)?;
    config.validate()?;
    match format {
        OutputFormat::Text => println!(
            "{} {} is valid: {} sources, {} steps",
            "✓".green().bold(),
            display_name(&config).bold(),
            config.sources.len(),
            config.steps.len()
        ),
        OutputFormat::Json => println!(
            "{}",
            json!({
                "name": config.name,
                "valid": true,
                "sources": config.sources.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
                "steps": config.steps.len(),
            })
        ),
    }
    Ok(())
}

fn print_step(report: &StepReport, format: OutputFormat) {
    match format {
        OutputFormat::Text => println!(
            "  {} {:<28} {} {}",
            format!("[{}]", report.index).dimmed(),
            report.step.to_string().yellow(),
            format!("({} attached)", report.attached).dimmed(),
            render(&report.view)
        ),
        OutputFormat::Json => println!(
            "{}",
            json!({
                "index": report.index,
                "step": report.step,
                "attached": report.attached,
                "view": report.view,
            })
        ),
    }
}

fn display_name(config: &ScenarioConfig) -> &str {
    if config.name.is_empty() {
        "scenario"
    } else {
        &config.name
    }
}

fn render(view: &Items<String, Value>) -> String {
    if view.is_empty() {
        return "{}".dimmed().to_string();
    }
    let pairs: Vec<String> = view
        .iter()
        .map(|(key, value)| format!("{}: {}", key.bold(), value))
        .collect();
    format!("{{{}}}", pairs.join(", "))
}
