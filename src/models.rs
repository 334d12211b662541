use serde::{Deserialize, Serialize};
use std::fmt;

/// Field value when the labeled block does not exist on the results page.
pub const NOT_REGISTERED: &str = "NO REGISTRADO";
/// Field value when the block exists but carries no readable text.
pub const NOT_AVAILABLE: &str = "N/A";

/// Which identifier the caller is searching by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LookupKind {
    Ruc,
    Dni,
}

impl LookupKind {
    pub fn tag(&self) -> &'static str {
        match self {
            LookupKind::Ruc => "RUC",
            LookupKind::Dni => "DNI",
        }
    }
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::str::FromStr for LookupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RUC" => Ok(LookupKind::Ruc),
            "DNI" => Ok(LookupKind::Dni),
            other => Err(format!("unknown lookup kind '{}', expected ruc or dni", other)),
        }
    }
}

/// Cache key: identifier type tag plus the raw identifier.
///
/// The tag keeps a DNI and a RUC with the same digits in separate entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupKey(String);

impl LookupKey {
    pub fn new(kind: LookupKind, identifier: &str) -> Self {
        Self(format!("{}:{}", kind.tag(), identifier))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Taxpayer registration data scraped from the results panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxpayerRecord {
    pub ruc: String,
    pub legal_name: String,
    pub trade_name: String,
    pub status: String,
    pub condition: String,
    pub fiscal_address: String,
}

impl Default for TaxpayerRecord {
    fn default() -> Self {
        Self {
            ruc: NOT_REGISTERED.to_string(),
            legal_name: NOT_REGISTERED.to_string(),
            trade_name: NOT_REGISTERED.to_string(),
            status: NOT_REGISTERED.to_string(),
            condition: NOT_REGISTERED.to_string(),
            fiscal_address: NOT_REGISTERED.to_string(),
        }
    }
}

/// Body of `POST /consultar-ruc`.
#[derive(Debug, Clone, Deserialize)]
pub struct RucRequest {
    pub ruc: String,
}

/// Body of `POST /consultar-dni`.
#[derive(Debug, Clone, Deserialize)]
pub struct DniRequest {
    pub dni: String,
}

/// Response body shared by both lookup routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LookupResponse {
    Found {
        success: bool,
        #[serde(rename = "fromCache")]
        from_cache: bool,
        data: TaxpayerRecord,
    },
    Failed {
        success: bool,
        message: String,
    },
}

impl LookupResponse {
    pub fn found(data: TaxpayerRecord, from_cache: bool) -> Self {
        LookupResponse::Found {
            success: true,
            from_cache,
            data,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        LookupResponse::Failed {
            success: false,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, LookupResponse::Found { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_keys_do_not_collide_across_kinds() {
        let ruc = LookupKey::new(LookupKind::Ruc, "12345678");
        let dni = LookupKey::new(LookupKind::Dni, "12345678");
        assert_ne!(ruc, dni);
        assert_eq!(dni.as_str(), "DNI:12345678");
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = TaxpayerRecord {
            ruc: "20123456789".into(),
            legal_name: "ACME SAC".into(),
            trade_name: "-".into(),
            status: "ACTIVO".into(),
            condition: "HABIDO".into(),
            fiscal_address: "AV. LIMA 123".into(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["legalName"], "ACME SAC");
        assert_eq!(value["tradeName"], "-");
        assert_eq!(value["fiscalAddress"], "AV. LIMA 123");
    }

    #[test]
    fn test_response_shapes() {
        let found = serde_json::to_value(LookupResponse::found(TaxpayerRecord::default(), true)).unwrap();
        assert_eq!(found["success"], json!(true));
        assert_eq!(found["fromCache"], json!(true));
        assert_eq!(found["data"]["ruc"], json!(NOT_REGISTERED));

        let failed = serde_json::to_value(LookupResponse::failed("boom")).unwrap();
        assert_eq!(failed, json!({"success": false, "message": "boom"}));
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("ruc".parse::<LookupKind>().unwrap(), LookupKind::Ruc);
        assert_eq!(" DNI ".parse::<LookupKind>().unwrap(), LookupKind::Dni);
        assert!("cpf".parse::<LookupKind>().is_err());
    }
}
