//! SUNAT taxpayer extraction.
//!
//! Drives one fresh browser session per lookup through the portal's search
//! form and scrapes the results panel into a [`TaxpayerRecord`]. Sessions are
//! gated by a fixed-size slot pool so bursts cannot spawn unbounded browsers.
//!
//! Once a slot is held the session runs on its own task, so a caller that
//! goes away (client disconnect, timeout) never leaves a browser unclosed.

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::browser::{BrowserLauncher, BrowserSession};
use crate::config::Config;
use crate::errors::{BrowserError, ExtractionError};
use crate::models::{LookupKind, TaxpayerRecord, NOT_AVAILABLE, NOT_REGISTERED};

const SEARCH_BY_DOCUMENT_BUTTON: &str = "#btnPorDocumento";
const DOCUMENT_INPUT: &str = "#txtNumeroDocumento";
const RUC_INPUT: &str = "#txtRuc";
const SUBMIT_BUTTON: &str = "#btnAceptar";
const CANDIDATE_LINK: &str = ".aRucs";
const RESULTS_PANEL: &str = ".list-group";

const DNI_KEY_DELAY: Duration = Duration::from_millis(100);
const RUC_KEY_DELAY: Duration = Duration::from_millis(50);

const TITLE_RUC: &str = "Número de RUC";
const TITLE_TRADE_NAME: &str = "Nombre Comercial";
const TITLE_STATUS: &str = "Estado del Contribuyente";
const TITLE_CONDITION: &str = "Condición del Contribuyente";
const TITLE_FISCAL_ADDRESS: &str = "Domicilio Fiscal";

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static whitespace regex"));
static BLOCK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".list-group-item").expect("static block selector"));
static BLOCK_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h4").expect("static title selector"));
static VALUE_TEXT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".list-group-item-text").expect("static value selector"));
static VALUE_HEADING: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".list-group-item-heading").expect("static heading selector")
});

/// Anything that can resolve an identifier to a taxpayer record.
#[async_trait]
pub trait TaxpayerLookup: Send + Sync {
    async fn lookup(
        &self,
        identifier: &str,
        kind: LookupKind,
    ) -> Result<TaxpayerRecord, ExtractionError>;
}

#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    pub portal_url: String,
    pub navigation_timeout: Duration,
    pub results_timeout: Duration,
    pub queue_timeout: Duration,
    pub max_concurrent_sessions: usize,
}

impl ExtractorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            portal_url: config.portal_url.clone(),
            navigation_timeout: config.navigation_timeout(),
            results_timeout: config.results_timeout(),
            queue_timeout: config.browser_queue_timeout(),
            max_concurrent_sessions: config.max_concurrent_browsers,
        }
    }
}

pub struct SunatExtractor {
    launcher: Arc<dyn BrowserLauncher>,
    slots: Arc<Semaphore>,
    settings: Arc<ExtractorSettings>,
}

impl SunatExtractor {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, settings: ExtractorSettings) -> Self {
        let slots = Arc::new(Semaphore::new(settings.max_concurrent_sessions.max(1)));
        Self {
            launcher,
            slots,
            settings: Arc::new(settings),
        }
    }

    /// Browser slots not currently held by a lookup.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, ExtractionError> {
        let acquire = self.slots.clone().acquire_owned();
        match tokio::time::timeout(self.settings.queue_timeout, acquire).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(ExtractionError::Scrape("browser pool is closed".to_string())),
            Err(_) => Err(ExtractionError::PoolSaturated(self.settings.queue_timeout)),
        }
    }
}

#[async_trait]
impl TaxpayerLookup for SunatExtractor {
    async fn lookup(
        &self,
        identifier: &str,
        kind: LookupKind,
    ) -> Result<TaxpayerRecord, ExtractionError> {
        let slot = self.acquire_slot().await.inspect_err(|e| {
            tracing::error!(kind = %kind, identifier, error = %e, "Scraper could not start");
        })?;

        tracing::info!(kind = %kind, identifier, "Scraper started");

        let launcher = self.launcher.clone();
        let settings = self.settings.clone();
        let identifier = identifier.to_string();

        // Dropping the JoinHandle detaches the task; it still closes its session.
        let task = tokio::spawn(async move {
            let _slot = slot;
            let outcome = extract_in_session(launcher.as_ref(), &settings, &identifier, kind).await;
            match &outcome {
                Ok(_) => tracing::info!(kind = %kind, identifier = %identifier, "Scraper finished successfully"),
                Err(e) => tracing::error!(kind = %kind, identifier = %identifier, error = %e, "Scraper failed"),
            }
            outcome
        });

        task.await.unwrap_or_else(|e| {
            tracing::error!(kind = %kind, error = %e, "Scraper task aborted");
            Err(ExtractionError::Scrape(format!("extraction task aborted: {}", e)))
        })
    }
}

/// Launches a session, runs the form flow and closes the session on every path.
async fn extract_in_session(
    launcher: &dyn BrowserLauncher,
    settings: &ExtractorSettings,
    identifier: &str,
    kind: LookupKind,
) -> Result<TaxpayerRecord, ExtractionError> {
    let mut session = launcher.launch().await?;
    let outcome = run_flow(settings, session.as_mut(), identifier, kind).await;
    if let Err(e) = session.close().await {
        tracing::warn!(identifier, error = %e, "Browser session did not close cleanly");
    }
    outcome
}

async fn run_flow(
    settings: &ExtractorSettings,
    session: &mut dyn BrowserSession,
    identifier: &str,
    kind: LookupKind,
) -> Result<TaxpayerRecord, ExtractionError> {
    let nav_timeout = settings.navigation_timeout;

    session.navigate(&settings.portal_url, nav_timeout).await?;

    match kind {
        LookupKind::Dni => {
            session
                .wait_for_element(SEARCH_BY_DOCUMENT_BUTTON, nav_timeout)
                .await?;
            session.click(SEARCH_BY_DOCUMENT_BUTTON).await?;
            session.wait_for_element(DOCUMENT_INPUT, nav_timeout).await?;
            session
                .type_text(DOCUMENT_INPUT, identifier, DNI_KEY_DELAY)
                .await?;
        }
        LookupKind::Ruc => {
            session.wait_for_element(RUC_INPUT, nav_timeout).await?;
            session
                .type_text(RUC_INPUT, identifier, RUC_KEY_DELAY)
                .await?;
        }
    }

    session.click(SUBMIT_BUTTON).await?;
    // The portal sometimes swaps the panel in place without navigating.
    if let Err(e) = session.wait_for_navigation(nav_timeout).await {
        tracing::warn!(
            kind = %kind,
            identifier,
            error = %e,
            "Form submission did not navigate, continuing without navigation"
        );
    }

    // A DNI tied to several taxpayers lands on a candidate list first.
    if session.exists(CANDIDATE_LINK).await? {
        tracing::info!(kind = %kind, identifier, "Multiple taxpayers listed, selecting the first");
        session.click(CANDIDATE_LINK).await?;
        session.wait_for_navigation(nav_timeout).await?;
    }

    match session
        .wait_for_element(RESULTS_PANEL, settings.results_timeout)
        .await
    {
        Ok(()) => {}
        Err(BrowserError::Timeout { .. }) => {
            return Err(ExtractionError::ResultsNotRendered(settings.results_timeout))
        }
        Err(e) => return Err(e.into()),
    }

    let html = session.content().await?;
    Ok(parse_results_panel(&html))
}

/// Collapses whitespace runs to a single space and trims the ends.
pub fn normalize_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Splits the `"<number> - <legal name>"` RUC field on its first hyphen.
///
/// Either half that ends up empty, or both when there is no hyphen, becomes
/// [`NOT_AVAILABLE`].
pub fn split_ruc_field(raw: &str) -> (String, String) {
    let non_empty = |s: &str| {
        let s = s.trim();
        if s.is_empty() {
            NOT_AVAILABLE.to_string()
        } else {
            s.to_string()
        }
    };

    match raw.split_once('-') {
        Some((number, name)) => (non_empty(number), non_empty(name)),
        None => (NOT_AVAILABLE.to_string(), NOT_AVAILABLE.to_string()),
    }
}

/// Parses the results panel of a SUNAT taxpayer page.
pub fn parse_results_panel(html: &str) -> TaxpayerRecord {
    let document = Html::parse_document(html);
    let blocks: Vec<ElementRef> = document.select(&BLOCK).collect();

    let (ruc, legal_name) = split_ruc_field(&field_value(&blocks, TITLE_RUC));

    TaxpayerRecord {
        ruc,
        legal_name,
        trade_name: field_value(&blocks, TITLE_TRADE_NAME),
        status: field_value(&blocks, TITLE_STATUS),
        condition: field_value(&blocks, TITLE_CONDITION),
        fiscal_address: field_value(&blocks, TITLE_FISCAL_ADDRESS),
    }
}

fn element_text(element: ElementRef) -> String {
    normalize_whitespace(&element.text().collect::<String>())
}

fn field_value(blocks: &[ElementRef], title: &str) -> String {
    let wanted = title.to_uppercase();
    let block = blocks.iter().find(|block| {
        block
            .select(&BLOCK_TITLE)
            .next()
            .map(|heading| element_text(heading).to_uppercase().contains(&wanted))
            .unwrap_or(false)
    });

    let Some(block) = block else {
        return NOT_REGISTERED.to_string();
    };

    block
        .select(&VALUE_TEXT)
        .next()
        .or_else(|| block.select(&VALUE_HEADING).nth(1))
        .map(element_text)
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(title: &str, value_html: &str) -> String {
        format!(
            r#"<div class="list-group-item">
                 <div class="row">
                   <div class="col-sm-5"><h4 class="list-group-item-heading">{}</h4></div>
                   <div class="col-sm-7">{}</div>
                 </div>
               </div>"#,
            title, value_html
        )
    }

    fn page(blocks: &[String]) -> String {
        format!(
            r#"<html><body><div class="panel"><div class="list-group">{}</div></div></body></html>"#,
            blocks.join("\n")
        )
    }

    fn full_page() -> String {
        page(&[
            block(
                "Número de RUC:",
                r#"<h4 class="list-group-item-heading">20123456789 - ACME SAC</h4>"#,
            ),
            block("Nombre Comercial:", r#"<p class="list-group-item-text">  ACME
                 STORES </p>"#),
            block("Estado del Contribuyente:", r#"<p class="list-group-item-text">ACTIVO</p>"#),
            block("Condición del Contribuyente:", r#"<p class="list-group-item-text">HABIDO</p>"#),
            block(
                "Domicilio Fiscal:",
                r#"<p class="list-group-item-text">AV. JAVIER PRADO   ESTE 123
                    LIMA - LIMA - SAN ISIDRO</p>"#,
            ),
        ])
    }

    #[test]
    fn test_parses_complete_panel() {
        let record = parse_results_panel(&full_page());
        assert_eq!(record.ruc, "20123456789");
        assert_eq!(record.legal_name, "ACME SAC");
        assert_eq!(record.trade_name, "ACME STORES");
        assert_eq!(record.status, "ACTIVO");
        assert_eq!(record.condition, "HABIDO");
        assert_eq!(
            record.fiscal_address,
            "AV. JAVIER PRADO ESTE 123 LIMA - LIMA - SAN ISIDRO"
        );
    }

    #[test]
    fn test_missing_block_is_not_registered() {
        let html = page(&[block(
            "Número de RUC:",
            r#"<h4 class="list-group-item-heading">20123456789 - ACME SAC</h4>"#,
        )]);
        let record = parse_results_panel(&html);
        assert_eq!(record.trade_name, NOT_REGISTERED);
        assert_eq!(record.fiscal_address, NOT_REGISTERED);
    }

    #[test]
    fn test_empty_value_is_not_available() {
        let html = page(&[block(
            "Estado del Contribuyente:",
            r#"<p class="list-group-item-text">   </p>"#,
        )]);
        assert_eq!(parse_results_panel(&html).status, NOT_AVAILABLE);
    }

    #[test]
    fn test_block_without_value_element_is_not_available() {
        let html = page(&[block("Condición del Contribuyente:", "")]);
        assert_eq!(parse_results_panel(&html).condition, NOT_AVAILABLE);
    }

    #[test]
    fn test_title_match_is_case_insensitive() {
        let html = page(&[block(
            "ESTADO DEL CONTRIBUYENTE:",
            r#"<p class="list-group-item-text">BAJA DE OFICIO</p>"#,
        )]);
        assert_eq!(parse_results_panel(&html).status, "BAJA DE OFICIO");
    }

    #[test]
    fn test_value_text_preferred_over_second_heading() {
        let html = page(&[block(
            "Nombre Comercial:",
            r#"<h4 class="list-group-item-heading">IGNORED</h4><p class="list-group-item-text">USED</p>"#,
        )]);
        assert_eq!(parse_results_panel(&html).trade_name, "USED");
    }

    #[test]
    fn test_empty_page_degrades_every_field() {
        let record = parse_results_panel("<html><body></body></html>");
        assert_eq!(record.ruc, NOT_AVAILABLE);
        assert_eq!(record.legal_name, NOT_AVAILABLE);
        assert_eq!(record.trade_name, NOT_REGISTERED);
        assert_eq!(record.status, NOT_REGISTERED);
    }

    #[test]
    fn test_split_ruc_field() {
        assert_eq!(
            split_ruc_field("20123456789 - ACME SAC"),
            ("20123456789".to_string(), "ACME SAC".to_string())
        );
        assert_eq!(
            split_ruc_field("10445566771 - PEREZ-GOMEZ JUAN"),
            ("10445566771".to_string(), "PEREZ-GOMEZ JUAN".to_string())
        );
        assert_eq!(
            split_ruc_field("20123456789"),
            (NOT_AVAILABLE.to_string(), NOT_AVAILABLE.to_string())
        );
        assert_eq!(
            split_ruc_field("20123456789 -  "),
            ("20123456789".to_string(), NOT_AVAILABLE.to_string())
        );
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \n\t b\u{a0}c  "), "a b c");
        assert_eq!(normalize_whitespace(""), "");
    }
}
