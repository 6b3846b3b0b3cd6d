use ymirrord::daemon::{MirrorConfig, MirrorRuntime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Once,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--once" => mode = CliMode::Once,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            println!("Usage: ymirrord [--once]");
            println!("  --once   Run a single reconciliation cycle and exit;");
            println!("           the exit status reports whether it converged");
            return Ok(());
        }
        CliMode::Once => {
            let config = MirrorConfig::from_env()?;
            let mut runtime = MirrorRuntime::bootstrap(config).await?;
            runtime.run_once().await?;
            Ok(())
        }
        CliMode::Run => {
            let config = MirrorConfig::from_env()?;
            let mut runtime = MirrorRuntime::bootstrap(config).await?;
            runtime.run_forever().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cli_mode_defaults_to_run() {
        let mode = parse_cli_mode(vec!["ymirrord".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Run);
    }

    #[test]
    fn parse_cli_mode_supports_once() {
        let mode = parse_cli_mode(vec!["ymirrord".to_string(), "--once".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Once);
    }

    #[test]
    fn parse_cli_mode_supports_help() {
        let mode = parse_cli_mode(vec!["ymirrord".to_string(), "-h".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Help);
    }

    #[test]
    fn parse_cli_mode_rejects_unknown_flags() {
        assert!(parse_cli_mode(vec!["ymirrord".to_string(), "--watch".to_string()]).is_err());
    }
}
