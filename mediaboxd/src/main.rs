use std::sync::Arc;

use anyhow::Context;
use mediaboxd::config::EngineConfig;
use mediaboxd::sync::engine::SyncEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Audit,
    Dedupe,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--audit" => mode = CliMode::Audit,
            "--dedupe" => mode = CliMode::Dedupe,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: mediaboxd [--audit|--dedupe]");
        println!("  --audit    Run a consistency audit and exit");
        println!("  --dedupe   Quarantine duplicate files and exit");
        return Ok(());
    }

    let config = EngineConfig::from_env().context("failed to load configuration")?;
    let engine = SyncEngine::from_config(&config)
        .await
        .context("failed to initialize engine")?;
    eprintln!(
        "[mediaboxd] started: library={}, categories={}",
        config.library_root.display(),
        config.categories.len()
    );

    match mode {
        CliMode::Audit => {
            engine.bootstrap().await.context("bootstrap failed")?;
            let report = engine.audit().await.context("audit failed")?;
            for warning in &report.warnings {
                eprintln!("[mediaboxd] audit warning: {warning:?}");
            }
            eprintln!(
                "[mediaboxd] audit: {} warnings, {} repaired",
                report.warnings.len(),
                report.repaired
            );
        }
        CliMode::Dedupe => {
            engine.bootstrap().await.context("bootstrap failed")?;
            let report = engine
                .quarantine_duplicates()
                .await
                .context("dedupe failed")?;
            eprintln!(
                "[mediaboxd] dedupe: {} groups, {} files quarantined",
                report.groups,
                report.quarantined.len()
            );
        }
        CliMode::Run => {
            let engine = Arc::new(engine);
            // Slow initialization runs once, off the reconcile path.
            let init = Arc::clone(&engine);
            tokio::spawn(async move {
                if let Err(err) = init.bootstrap().await {
                    eprintln!("[mediaboxd] bootstrap error: {err}");
                }
            });
            loop {
                match engine.reconcile_all().await {
                    Ok(summary) => eprintln!(
                        "[mediaboxd] pass complete: succeeded={} skipped={} failed={}",
                        summary.succeeded, summary.skipped, summary.failed
                    ),
                    Err(err) => eprintln!("[mediaboxd] pass error: {err}"),
                }
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("[mediaboxd] shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(config.reconcile_interval) => {}
                }
            }
        }
        CliMode::Help => unreachable!(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cli_mode_defaults_to_run() {
        let mode = parse_cli_mode(vec!["mediaboxd".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Run);
    }

    #[test]
    fn parse_cli_mode_supports_audit_and_dedupe() {
        let mode = parse_cli_mode(vec!["mediaboxd".to_string(), "--audit".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Audit);
        let mode = parse_cli_mode(vec!["mediaboxd".to_string(), "--dedupe".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Dedupe);
    }

    #[test]
    fn parse_cli_mode_rejects_unknown_arguments() {
        assert!(parse_cli_mode(vec!["mediaboxd".to_string(), "--bogus".to_string()]).is_err());
    }
}
