//! Tandem Relay-Server – Einstiegspunkt
//!
//! Aufruf: `tandem-server [--config <pfad>]`. Ohne Argument gilt
//! `TANDEM_CONFIG`, danach `relay.toml`.

use anyhow::Result;
use tandem_server::{config::ServerConfig, logging, Server};

const STANDARD_CONFIG: &str = "relay.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let config_pfad = config_pfad(
        std::env::args().skip(1),
        std::env::var("TANDEM_CONFIG").ok(),
    )?;

    let config = ServerConfig::laden(&config_pfad)?;
    let format = logging::initialisieren(&config.logging);
    config.pruefen()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        log_format = ?format,
        max_ttl_sek = config.relay.max_ttl_sek,
        "Tandem Relay wird initialisiert"
    );

    Server::neu(config).starten().await
}

/// `--config <pfad>` geht vor der Umgebungsvariable
fn config_pfad(
    mut args: impl Iterator<Item = String>,
    umgebung: Option<String>,
) -> Result<String> {
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                return args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config erwartet einen Pfad"));
            }
            andere => anyhow::bail!("Unbekanntes Argument '{andere}'"),
        }
    }
    Ok(umgebung.unwrap_or_else(|| STANDARD_CONFIG.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(a: &[&str]) -> impl Iterator<Item = String> {
        a.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn argument_vor_umgebung_vor_standard() {
        assert_eq!(
            config_pfad(args(&["--config", "a.toml"]), Some("b.toml".into())).unwrap(),
            "a.toml"
        );
        assert_eq!(config_pfad(args(&[]), Some("b.toml".into())).unwrap(), "b.toml");
        assert_eq!(config_pfad(args(&[]), None).unwrap(), STANDARD_CONFIG);
    }

    #[test]
    fn fehlerhafte_argumente() {
        assert!(config_pfad(args(&["--config"]), None).is_err());
        assert!(config_pfad(args(&["--port", "1"]), None).is_err());
    }
}
