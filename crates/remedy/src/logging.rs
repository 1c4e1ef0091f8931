use std::env;

use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins when set; otherwise the
/// level is `info`, or `debug` for our crates when verbose.
pub fn init(verbose: bool) {
    let fallback = if verbose {
        "info,remedy=debug,remedy_core=debug,remedy_rag=debug,remedy_llm=debug,remedy_artifacts=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .try_init();
    if verbose {
        tracing::debug!("verbose logging enabled");
    }
}

pub fn env_flag() -> bool {
    env::var("REMEDY_VERBOSE")
        .map(|value| parse_bool(value.trim()))
        .unwrap_or(false)
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_truthy_values() {
        for value in ["1", "true", " YES ", "on"] {
            assert!(parse_bool(value), "{value}");
        }
        for value in ["0", "false", "", "maybe"] {
            assert!(!parse_bool(value), "{value}");
        }
    }
}
