#![deny(clippy::all, warnings)]

use atty::Stream;
use clap::Parser;
use color_eyre::Result;
use serde_json::{json, Value};

use pydeb_core::{outcome_for_error, CommandStatus, ConversionReport, ExecutionOutcome};

mod cli;
mod style;

use cli::PydebCli;
use style::Style;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = PydebCli::parse();
    init_tracing(cli.verbose);

    let options = cli.to_options();
    let outcome = match pydeb_core::convert(&options, &cli.pip_args) {
        Ok(report) => outcome_from_report(&report),
        Err(error) => outcome_for_error(&error),
    };
    let code = emit_output(&cli, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(verbose: u8) {
    let verbose = if verbose == 0 {
        std::env::var("PYDEB_VERBOSE")
            .ok()
            .and_then(|raw| raw.trim().parse::<u8>().ok())
            .unwrap_or(0)
    } else {
        verbose
    };
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = format!("pydeb_core={level},pydeb_domain={level},pydeb_cli={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn outcome_from_report(report: &ConversionReport) -> ExecutionOutcome {
    let details = serde_json::to_value(report).unwrap_or(Value::Null);
    if report.is_success() {
        return ExecutionOutcome::success(
            format!("converted {} package(s)", report.results.len()),
            details,
        );
    }
    let message = format!(
        "{} requirement(s) failed, {} package(s) converted",
        report.failures.len(),
        report.results.len()
    );
    if report.failures.iter().all(|failure| failure.is_user_error) {
        ExecutionOutcome::user_error(message, details)
    } else {
        ExecutionOutcome::failure(message, details)
    }
}

fn emit_output(cli: &PydebCli, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = match outcome.status {
        CommandStatus::Ok => 0,
        CommandStatus::UserError => 1,
        CommandStatus::Failure => 2,
    };

    if cli.json {
        let payload = json!({
            "status": status_label(&outcome.status),
            "message": outcome.message,
            "details": outcome.details,
            "exit_code": code,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(code);
    }
    if cli.quiet {
        return Ok(code);
    }

    let style = Style::new(cli.no_color, atty::is(Stream::Stdout));
    println!("{}", style.status(&outcome.status, &outcome.message));
    if let Some(results) = outcome.details.get("results").and_then(Value::as_array) {
        for result in results {
            if let Some(archive) = result.get("archive").and_then(Value::as_str) {
                println!("{}", style.info(archive));
            }
        }
    }
    if let Some(failures) = outcome.details.get("failures").and_then(Value::as_array) {
        for failure in failures {
            let requirement = failure
                .get("requirement")
                .and_then(Value::as_str)
                .unwrap_or("<unknown>");
            let error = failure.get("error").and_then(Value::as_str).unwrap_or("");
            println!("{}", style.detail(&format!("{requirement}: {error}")));
        }
    }
    Ok(code)
}

fn status_label(status: &CommandStatus) -> &'static str {
    match status {
        CommandStatus::Ok => "ok",
        CommandStatus::UserError => "user-error",
        CommandStatus::Failure => "failure",
    }
}
