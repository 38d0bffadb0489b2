use owo_colors::OwoColorize;
use std::sync::OnceLock;
use supports_color::Stream;
use tracing_subscriber::EnvFilter;

static ANSI_ENABLED: OnceLock<bool> = OnceLock::new();

/// Installs the stderr subscriber. `RUST_LOG` overrides the default `warn`
/// filter. Program output keeps stdout to itself.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let ansi = ansi_enabled();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(ansi)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    Ok(())
}

pub fn category_assembler() -> String {
    if ansi_enabled() {
        format!("{}", "ASM".bright_cyan().bold())
    } else {
        "ASM".to_string()
    }
}

pub fn category_engine(kind: &str) -> String {
    let label = kind.to_ascii_uppercase();
    if ansi_enabled() {
        format!("{}", label.bright_green().bold())
    } else {
        label
    }
}

pub fn category_repl() -> String {
    if ansi_enabled() {
        format!("{}", "REPL".bright_magenta().bold())
    } else {
        "REPL".to_string()
    }
}

pub fn ansi_enabled() -> bool {
    *ANSI_ENABLED.get_or_init(detect_ansi)
}

fn detect_ansi() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }
    supports_color::on_cached(Stream::Stderr).is_some()
}
