use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use spreadline::calibration::{
    self, DEFAULT_MAX_SHIFT, HistoricalMatch, Metrics, expected_calibration_error,
};
use spreadline::config::{Correction, CorrectionConfig, EngineConfig};
use spreadline::logging;
use spreadline::params::BettingLine;
use spreadline::types::{Outcome, Prob3};

const MIN_SAMPLES: usize = 8;
const ECE_BINS: usize = 10;
const MAX_DRIFT_LINES: usize = 200;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    logging::init_from_env()?;

    let data_path = parse_path_arg("--data")
        .or_else(|| std::env::var("SPREADLINE_HISTORY").ok().map(PathBuf::from))
        .context("missing --data <history.json>")?;
    let config_path = parse_path_arg("--config")
        .or_else(|| std::env::var("SPREADLINE_CONFIG").ok().map(PathBuf::from));
    let config = EngineConfig::load_or_default(config_path.as_deref())?;
    let max_shift = parse_f64_arg("--max-shift")?
        .unwrap_or(DEFAULT_MAX_SHIFT)
        .clamp(0.001, 0.20);
    let apply_path = parse_path_arg("--apply");
    let force_apply = has_flag("--force-apply");

    let raw = fs::read_to_string(&data_path)
        .with_context(|| format!("read history {}", data_path.display()))?;
    let matches: Vec<HistoricalMatch> = serde_json::from_str(&raw).context("parse history")?;
    let matches: Vec<HistoricalMatch> = matches
        .into_iter()
        .filter(|m| m.spread.is_finite() && m.total.is_finite())
        .collect();
    if matches.len() < MIN_SAMPLES {
        return Err(anyhow!(
            "need at least {MIN_SAMPLES} usable matches, got {}",
            matches.len()
        ));
    }

    let split_idx = train_split_index(matches.len());
    let (train, holdout) = matches.split_at(split_idx);

    let baseline_cfg = config.clone().with_corrections(CorrectionConfig::none());
    let baseline = calibration::evaluate_config(holdout, &baseline_cfg);
    let configured = calibration::evaluate_config(holdout, &config);

    let (fitted_rho, train_fit) = calibration::fit_low_score_rho(train, &config);
    let fitted_cfg = config.clone().with_corrections(CorrectionConfig {
        low_score_enabled: true,
        low_score_rho: fitted_rho,
        ..config.corrections
    });
    let fitted = calibration::evaluate_config(holdout, &fitted_cfg);

    println!("Spreadline calibration");
    println!("History: {}", data_path.display());
    println!(
        "Samples: {} (train {}, holdout {})",
        matches.len(),
        train.len(),
        holdout.len()
    );
    println!();
    print_metrics("baseline", &baseline, ece(holdout, &baseline_cfg));
    print_metrics("configured", &configured, ece(holdout, &config));
    print_metrics("fitted", &fitted, ece(holdout, &fitted_cfg));
    println!(
        "fitted low-score rho={:+.2} (train brier={:.4}, configured rho={:+.2})",
        fitted_rho, train_fit.brier, config.corrections.low_score_rho
    );

    let lines: Vec<BettingLine> = matches
        .iter()
        .take(MAX_DRIFT_LINES)
        .map(HistoricalMatch::line)
        .collect();
    let checks = calibration::validate_corrections(&lines, &fitted_cfg, max_shift);
    println!();
    println!("Correction drift vs uncorrected baseline (limit {max_shift:.3}):");
    for check in &checks {
        println!(
            "  {:<15} max_drift={:.4} {}",
            check.correction.to_string(),
            check.max_drift,
            if check.within_limit { "ok" } else { "EXCEEDS" }
        );
    }

    let val_gain = configured.brier - fitted.brier;
    println!();
    println!("holdout brier gain={val_gain:+.6}");

    let Some(path) = apply_path else {
        return Ok(());
    };
    let low_score_ok = checks
        .iter()
        .any(|c| c.correction == Correction::LowScore && c.within_limit);
    if !force_apply && (val_gain < 0.0 || !low_score_ok) {
        println!("Not applying: fitted rho did not improve holdout or drifts past limit");
        return Ok(());
    }
    fitted_cfg.save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn ece(matches: &[HistoricalMatch], config: &EngineConfig) -> f64 {
    let predictions: Vec<Prob3> = matches
        .iter()
        .map(|m| calibration::result_probs(m.line(), config))
        .collect();
    let outcomes: Vec<Outcome> = matches.iter().map(HistoricalMatch::outcome).collect();
    expected_calibration_error(&predictions, &outcomes, ECE_BINS)
}

fn print_metrics(name: &str, m: &Metrics, ece: f64) {
    println!(
        "{:<10} samples={} brier={:.4} ll={:.4} acc={:.3} ece={:.4}",
        name, m.samples, m.brier, m.log_loss, m.accuracy, ece
    );
}

fn train_split_index(n: usize) -> usize {
    if n <= 2 {
        return 1;
    }
    let idx = ((n as f64) * 0.85).round() as usize;
    idx.clamp(1, n - 1)
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
    parse_str_arg(name)
        .map(|raw| {
            raw.parse::<f64>()
                .with_context(|| format!("{name}: not a number: {raw:?}"))
        })
        .transpose()
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}
