//! Runs a single lookup against the live portal and prints the record.
//!
//! Usage: `probe <ruc|dni> <identifier>`
//!
//! Bypasses the HTTP layer, cache and rate limiter; useful to check whether
//! the portal layout still matches the extractor.

use std::sync::Arc;

use sunat_ruc_api::browser::ChromiumLauncher;
use sunat_ruc_api::config::Config;
use sunat_ruc_api::extractor::{ExtractorSettings, SunatExtractor, TaxpayerLookup};
use sunat_ruc_api::models::LookupKind;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sunat_ruc_api=info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (kind, identifier) = match (args.next(), args.next()) {
        (Some(kind), Some(identifier)) => (
            kind.parse::<LookupKind>().map_err(|e| anyhow::anyhow!(e))?,
            identifier,
        ),
        _ => anyhow::bail!("usage: probe <ruc|dni> <identifier>"),
    };

    let config = Config::from_env()?;
    let extractor = SunatExtractor::new(
        Arc::new(ChromiumLauncher::from_config(&config)),
        ExtractorSettings::from_config(&config),
    );

    let record = extractor
        .lookup(&identifier, kind)
        .await
        .map_err(|e| anyhow::anyhow!(e.client_message()))?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
