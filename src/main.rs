use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde_json::json;

use spreadline::adjustment::{ExternalAdjustment, TeamAdjustments};
use spreadline::config::EngineConfig;
use spreadline::engine::{self, LineReport, MatchReport, MatchRequest};
use spreadline::logging;
use spreadline::params::MatchParameters;
use spreadline::types::Period;

const TOP_SCORES: usize = 5;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    logging::init_from_env()?;

    let config_path = parse_path_arg("--config")
        .or_else(|| std::env::var("SPREADLINE_CONFIG").ok().map(PathBuf::from));
    let config = EngineConfig::load_or_default(config_path.as_deref())?;
    let as_json = has_flag("--json");

    if let Some(batch) = parse_path_arg("--batch") {
        return run_batch(&batch, &config, as_json);
    }

    let spread = parse_f64_arg("--spread")?.context("missing --spread")?;
    let total = parse_f64_arg("--total")?.context("missing --total")?;
    let params = MatchParameters::new(
        parse_f64_arg("--spread-open")?.unwrap_or(spread),
        parse_f64_arg("--total-open")?.unwrap_or(total),
        spread,
        total,
    )?;
    let adjustments = TeamAdjustments {
        home: parse_form_arg("--home-form")?,
        away: parse_form_arg("--away-form")?,
    };

    let report = engine::compute(&params, &adjustments, &config)?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn run_batch(path: &Path, config: &EngineConfig, as_json: bool) -> Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read batch file {}", path.display()))?;
    let requests: Vec<MatchRequest> =
        serde_json::from_str(&raw).context("parse batch requests")?;
    tracing::info!(matches = requests.len(), "pricing batch");

    let results = engine::compute_batch(&requests, config);
    let mut failed = 0usize;

    if as_json {
        let rows: Vec<_> = requests
            .iter()
            .zip(&results)
            .map(|(req, result)| match result {
                Ok(report) => json!({ "id": req.id, "report": report }),
                Err(err) => json!({ "id": req.id, "error": err.to_string() }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    }

    for (idx, (req, result)) in requests.iter().zip(&results).enumerate() {
        let id = req.id.clone().unwrap_or_else(|| format!("#{}", idx + 1));
        match result {
            Ok(report) if !as_json => {
                println!("== {id} ==");
                print_report(report);
                println!();
            }
            Ok(_) => {}
            Err(err) => {
                failed += 1;
                eprintln!("[WARN] {id}: {err}");
            }
        }
    }

    if failed == requests.len() && !requests.is_empty() {
        return Err(anyhow!("no match in the batch could be priced"));
    }
    Ok(())
}

fn print_report(report: &MatchReport) {
    let cur = &report.current;
    let open = &report.opening;
    println!(
        "Line: spread {:+.2} total {:.2} (opened {:+.2} / {:.2})",
        cur.line.spread, cur.line.total, open.line.spread, open.line.total
    );
    println!(
        "Expected goals: home {:.3} away {:.3} (line {:.3} / {:.3})",
        cur.rates.home, cur.rates.away, cur.base_rates.home, cur.base_rates.away
    );

    for period in [Period::FullTime, Period::HalfTime] {
        println!();
        print_period(cur, period);
    }

    let mv = &report.movement;
    if mv.spread_change != 0.0 || mv.total_change != 0.0 {
        println!();
        println!(
            "Movement: spread {:+.2} total {:+.2} xG home {:+.3} away {:+.3}",
            mv.spread_change, mv.total_change, mv.home_rate_change, mv.away_rate_change
        );
        println!(
            "Money is on the {} side",
            if mv.favours_home() { "home" } else { "away" }
        );
        if let Some(shift) = report.largest_shift() {
            println!(
                "Largest shift: {} {:.1}% -> {:.1}%",
                shift.label,
                shift.opening * 100.0,
                shift.current * 100.0
            );
        }
    }

    if !cur.diagnostics.is_empty() {
        println!();
        println!("Diagnostics:");
        for diagnostic in &cur.diagnostics {
            println!("  {diagnostic:?}");
        }
    }
}

fn print_period(report: &LineReport, period: Period) {
    println!("{}", period.short_label());
    for row in report.markets.rows().iter().filter(|r| r.period == period) {
        let odds = row
            .fair_odds
            .map(|o| format!("{o:.2}"))
            .unwrap_or_else(|| "-".to_string());
        println!("  {:<24} {:>6.2}%  {:>7}", row.label, row.probability * 100.0, odds);
    }
    let top = report.markets.top_correct_scores(period, TOP_SCORES);
    let joined = top
        .iter()
        .map(|(h, a, p)| format!("{h}-{a} {:.1}%", p * 100.0))
        .collect::<Vec<_>>()
        .join(", ");
    println!("  Most likely: {joined}");
}

fn parse_form_arg(name: &str) -> Result<Option<ExternalAdjustment>> {
    let Some(raw) = parse_str_arg(name) else {
        return Ok(None);
    };
    let (form, variance) = raw
        .split_once(',')
        .ok_or_else(|| anyhow!("{name} expects form,variance"))?;
    let form = form
        .trim()
        .parse::<f64>()
        .with_context(|| format!("{name}: bad form factor"))?;
    let variance = variance
        .trim()
        .parse::<f64>()
        .with_context(|| format!("{name}: bad variance"))?;
    Ok(Some(ExternalAdjustment::new(form, variance)))
}

fn parse_str_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && !raw.trim().is_empty()
        {
            return Some(raw.trim().to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    parse_str_arg(name).map(PathBuf::from)
}

fn parse_f64_arg(name: &str) -> Result<Option<f64>> {
    parse_number(name, parse_str_arg(name))
}

fn parse_number(name: &str, raw: Option<String>) -> Result<Option<f64>> {
    raw.map(|raw| {
        raw.parse::<f64>()
            .with_context(|| format!("{name}: not a number: {raw:?}"))
    })
    .transpose()
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_number_is_not_reported_as_missing() {
        let err = parse_number("--spread", Some("abc".to_string())).unwrap_err();
        assert!(err.to_string().contains("--spread: not a number"));
        assert!(!err.to_string().contains("missing"));
    }

    #[test]
    fn absent_and_signed_numbers() {
        assert_eq!(parse_number("--spread-open", None).unwrap(), None);
        assert_eq!(
            parse_number("--spread-open", Some("-0.75".to_string())).unwrap(),
            Some(-0.75)
        );
    }
}
