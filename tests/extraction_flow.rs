/// Extraction flow tests against a scripted portal
/// The fake session models the portal's screens (search form, candidate list,
/// results panel) so the extractor's navigation logic runs without a browser
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sunat_ruc_api::browser::{BrowserLauncher, BrowserSession};
use sunat_ruc_api::errors::{BrowserError, ExtractionError};
use sunat_ruc_api::extractor::{ExtractorSettings, SunatExtractor, TaxpayerLookup};
use sunat_ruc_api::models::{LookupKind, NOT_REGISTERED};
use tokio::sync::Notify;

const RESULTS_HTML: &str = r#"
<html><body>
  <div class="list-group">
    <div class="list-group-item">
      <h4 class="list-group-item-heading">Número de RUC:</h4>
      <h4 class="list-group-item-heading">20123456789 - ACME SAC</h4>
    </div>
    <div class="list-group-item">
      <h4 class="list-group-item-heading">Estado del Contribuyente:</h4>
      <p class="list-group-item-text">ACTIVO</p>
    </div>
    <div class="list-group-item">
      <h4 class="list-group-item-heading">Condición del Contribuyente:</h4>
      <p class="list-group-item-text">HABIDO</p>
    </div>
    <div class="list-group-item">
      <h4 class="list-group-item-heading">Domicilio Fiscal:</h4>
      <p class="list-group-item-text">AV. LIMA 123   LIMA</p>
    </div>
  </div>
</body></html>"#;

#[derive(Clone)]
struct PortalScript {
    results_html: Option<String>,
    candidate_list: bool,
    submit_navigates: bool,
    load_fails: bool,
    launch_fails: bool,
    hold_on_load: Option<Arc<Notify>>,
}

impl Default for PortalScript {
    fn default() -> Self {
        Self {
            results_html: Some(RESULTS_HTML.to_string()),
            candidate_list: false,
            submit_navigates: true,
            load_fails: false,
            launch_fails: false,
            hold_on_load: None,
        }
    }
}

#[derive(Default)]
struct Journal {
    calls: Mutex<Vec<String>>,
    launched: AtomicUsize,
    closed: AtomicUsize,
}

impl Journal {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Screen {
    Blank,
    Search { document_mode: bool },
    Candidates,
    Results,
}

struct FakeSession {
    script: PortalScript,
    journal: Arc<Journal>,
    screen: Screen,
    pending_navigation: bool,
}

impl FakeSession {
    fn visible(&self, selector: &str) -> bool {
        match self.screen {
            Screen::Search { document_mode } => match selector {
                "#btnPorDocumento" | "#btnAceptar" => true,
                "#txtRuc" => !document_mode,
                "#txtNumeroDocumento" => document_mode,
                _ => false,
            },
            Screen::Candidates => selector == ".aRucs",
            Screen::Results => selector == ".list-group" && self.script.results_html.is_some(),
            Screen::Blank => false,
        }
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), BrowserError> {
        self.journal.record(format!("navigate {}", url));
        if let Some(hold) = &self.script.hold_on_load {
            hold.notified().await;
        }
        if self.script.load_fails {
            return Err(BrowserError::Navigation("net::ERR_CONNECTION_RESET".into()));
        }
        self.screen = Screen::Search {
            document_mode: false,
        };
        Ok(())
    }

    async fn wait_for_navigation(&mut self, timeout: Duration) -> Result<(), BrowserError> {
        self.journal.record("wait_for_navigation");
        if std::mem::take(&mut self.pending_navigation) {
            Ok(())
        } else {
            Err(BrowserError::Timeout {
                what: "navigation".into(),
                after: timeout,
            })
        }
    }

    async fn wait_for_element(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        self.journal.record(format!("wait {}", selector));
        if self.visible(selector) {
            Ok(())
        } else {
            Err(BrowserError::Timeout {
                what: format!("element {}", selector),
                after: timeout,
            })
        }
    }

    async fn exists(&mut self, selector: &str) -> Result<bool, BrowserError> {
        Ok(self.visible(selector))
    }

    async fn click(&mut self, selector: &str) -> Result<(), BrowserError> {
        self.journal.record(format!("click {}", selector));
        match (self.screen, selector) {
            (Screen::Search { .. }, "#btnPorDocumento") => {
                self.screen = Screen::Search {
                    document_mode: true,
                };
            }
            (Screen::Search { .. }, "#btnAceptar") => {
                self.screen = if self.script.candidate_list {
                    Screen::Candidates
                } else {
                    Screen::Results
                };
                self.pending_navigation = self.script.submit_navigates;
            }
            (Screen::Candidates, ".aRucs") => {
                self.screen = Screen::Results;
                self.pending_navigation = true;
            }
            _ => return Err(BrowserError::ElementNotFound(selector.to_string())),
        }
        Ok(())
    }

    async fn type_text(
        &mut self,
        selector: &str,
        text: &str,
        _key_delay: Duration,
    ) -> Result<(), BrowserError> {
        if !self.visible(selector) {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        self.journal.record(format!("type {} {}", selector, text));
        Ok(())
    }

    async fn content(&mut self) -> Result<String, BrowserError> {
        Ok(self.script.results_html.clone().unwrap_or_default())
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        self.journal.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeLauncher {
    script: PortalScript,
    journal: Arc<Journal>,
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        if self.script.launch_fails {
            return Err(BrowserError::Launch("chrome not found".into()));
        }
        self.journal.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            script: self.script.clone(),
            journal: self.journal.clone(),
            screen: Screen::Blank,
            pending_navigation: false,
        }))
    }
}

fn settings(max_sessions: usize) -> ExtractorSettings {
    ExtractorSettings {
        portal_url: "https://portal.test/FrameCriterioBusquedaWeb.jsp".into(),
        navigation_timeout: Duration::from_secs(1),
        results_timeout: Duration::from_secs(10),
        queue_timeout: Duration::from_millis(50),
        max_concurrent_sessions: max_sessions,
    }
}

fn extractor(script: PortalScript) -> (SunatExtractor, Arc<Journal>) {
    let journal = Arc::new(Journal::default());
    let launcher = Arc::new(FakeLauncher {
        script,
        journal: journal.clone(),
    });
    (SunatExtractor::new(launcher, settings(2)), journal)
}

#[tokio::test]
async fn test_ruc_lookup_fills_record() {
    let (extractor, journal) = extractor(PortalScript::default());

    let record = extractor.lookup("20123456789", LookupKind::Ruc).await.unwrap();

    assert_eq!(record.ruc, "20123456789");
    assert_eq!(record.legal_name, "ACME SAC");
    assert_eq!(record.status, "ACTIVO");
    assert_eq!(record.condition, "HABIDO");
    assert_eq!(record.fiscal_address, "AV. LIMA 123 LIMA");
    assert_eq!(record.trade_name, NOT_REGISTERED);

    let calls = journal.calls();
    assert!(calls.contains(&"type #txtRuc 20123456789".to_string()));
    assert!(!calls.iter().any(|c| c.contains("#btnPorDocumento")));
    assert_eq!(journal.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dni_lookup_switches_to_document_search() {
    let (extractor, journal) = extractor(PortalScript::default());

    extractor.lookup("44556677", LookupKind::Dni).await.unwrap();

    let calls = journal.calls();
    let switch = calls.iter().position(|c| c == "click #btnPorDocumento").unwrap();
    let typed = calls
        .iter()
        .position(|c| c == "type #txtNumeroDocumento 44556677")
        .unwrap();
    let submit = calls.iter().position(|c| c == "click #btnAceptar").unwrap();
    assert!(switch < typed && typed < submit);
}

#[tokio::test]
async fn test_dni_with_several_taxpayers_selects_first_candidate() {
    let (extractor, journal) = extractor(PortalScript {
        candidate_list: true,
        ..PortalScript::default()
    });

    let record = extractor.lookup("44556677", LookupKind::Dni).await.unwrap();

    assert_eq!(record.ruc, "20123456789");
    assert!(journal.calls().contains(&"click .aRucs".to_string()));
    assert_eq!(journal.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_submission_without_navigation_continues() {
    let (extractor, _journal) = extractor(PortalScript {
        submit_navigates: false,
        ..PortalScript::default()
    });

    let record = extractor.lookup("20123456789", LookupKind::Ruc).await.unwrap();
    assert_eq!(record.legal_name, "ACME SAC");
}

#[tokio::test]
async fn test_missing_results_panel_is_terminal_and_closes_session() {
    let (extractor, journal) = extractor(PortalScript {
        results_html: None,
        ..PortalScript::default()
    });

    let err = extractor
        .lookup("20000000000", LookupKind::Ruc)
        .await
        .unwrap_err();

    assert!(matches!(err, ExtractionError::ResultsNotRendered(d) if d == Duration::from_secs(10)));
    assert_eq!(journal.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_load_failure_is_navigation_error_and_closes_session() {
    let (extractor, journal) = extractor(PortalScript {
        load_fails: true,
        ..PortalScript::default()
    });

    let err = extractor
        .lookup("20123456789", LookupKind::Ruc)
        .await
        .unwrap_err();

    assert!(matches!(err, ExtractionError::Navigation(_)));
    assert!(err.client_message().starts_with("Error en Scraper: "));
    assert_eq!(journal.launched.load(Ordering::SeqCst), 1);
    assert_eq!(journal.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_launch_failure_is_reported() {
    let (extractor, journal) = extractor(PortalScript {
        launch_fails: true,
        ..PortalScript::default()
    });

    let err = extractor
        .lookup("20123456789", LookupKind::Ruc)
        .await
        .unwrap_err();

    assert!(matches!(err, ExtractionError::Launch(_)));
    assert_eq!(journal.closed.load(Ordering::SeqCst), 0);
    assert_eq!(extractor.available_slots(), 2);
}

#[tokio::test]
async fn test_saturated_pool_rejects_after_queue_timeout() {
    let hold = Arc::new(Notify::new());
    let journal = Arc::new(Journal::default());
    let launcher = Arc::new(FakeLauncher {
        script: PortalScript {
            hold_on_load: Some(hold.clone()),
            ..PortalScript::default()
        },
        journal: journal.clone(),
    });
    let extractor = Arc::new(SunatExtractor::new(launcher, settings(1)));

    let busy = {
        let extractor = extractor.clone();
        tokio::spawn(async move { extractor.lookup("20123456789", LookupKind::Ruc).await })
    };

    // Wait until the first lookup holds the only slot
    while journal.launched.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(extractor.available_slots(), 0);

    let err = extractor
        .lookup("20987654321", LookupKind::Ruc)
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractionError::PoolSaturated(_)));

    hold.notify_one();
    assert!(busy.await.unwrap().is_ok());
    assert_eq!(extractor.available_slots(), 1);
}

#[tokio::test]
async fn test_abandoned_lookup_still_closes_session() {
    let hold = Arc::new(Notify::new());
    let (extractor, journal) = extractor(PortalScript {
        hold_on_load: Some(hold.clone()),
        ..PortalScript::default()
    });

    // The caller gives up while the portal is still loading
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), extractor.lookup("20123456789", LookupKind::Ruc))
            .await;
    assert!(abandoned.is_err());
    assert_eq!(journal.launched.load(Ordering::SeqCst), 1);

    hold.notify_one();
    tokio::time::timeout(Duration::from_secs(5), async {
        while journal.closed.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session was never closed");

    assert_eq!(journal.closed.load(Ordering::SeqCst), 1);
    tokio::time::timeout(Duration::from_secs(5), async {
        while extractor.available_slots() < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("browser slot was never released");
}
