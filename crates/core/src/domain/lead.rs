use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeadId(pub String);

impl LeadId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for LeadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadSource {
    Facebook,
    Manual,
}

impl LeadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Facebook => "facebook",
            Self::Manual => "manual",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "facebook" => Some(Self::Facebook),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Position of a lead in the sales funnel.
///
/// The Spanish names used by the first deployment are accepted as aliases so
/// rows and clients from that era keep working.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStage {
    #[default]
    #[serde(alias = "nuevo")]
    New,
    #[serde(alias = "contactado")]
    Contacted,
    #[serde(alias = "cualificado")]
    Qualified,
    #[serde(alias = "cerrado_venta")]
    ClosedSale,
    #[serde(alias = "cerrado_no_venta")]
    ClosedNoSale,
}

impl LeadStage {
    pub const ALL: [LeadStage; 5] =
        [Self::New, Self::Contacted, Self::Qualified, Self::ClosedSale, Self::ClosedNoSale];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::Qualified => "qualified",
            Self::ClosedSale => "closed_sale",
            Self::ClosedNoSale => "closed_no_sale",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "new" | "nuevo" => Some(Self::New),
            "contacted" | "contactado" => Some(Self::Contacted),
            "qualified" | "cualificado" => Some(Self::Qualified),
            "closed_sale" | "cerrado_venta" => Some(Self::ClosedSale),
            "closed_no_sale" | "cerrado_no_venta" => Some(Self::ClosedNoSale),
            _ => None,
        }
    }

    /// Conversions API event emitted when a lead enters this stage.
    ///
    /// `ClosedNoSale` deliberately reports nothing downstream.
    pub fn conversion_event(&self) -> Option<&'static str> {
        match self {
            Self::New => Some("Lead"),
            Self::Contacted => Some("Contact"),
            Self::Qualified => Some("QualifiedLead"),
            Self::ClosedSale => Some("Purchase"),
            Self::ClosedNoSale => None,
        }
    }
}

impl std::str::FromStr for LeadStage {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| DomainError::UnknownStage(value.trim().to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: LeadId,
    /// Identifier assigned by the source platform, unique when present.
    #[serde(rename = "leadId")]
    pub external_id: Option<String>,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub source: LeadSource,
    pub stage: LeadStage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewLead {
    pub external_id: Option<String>,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub source: LeadSource,
}

impl NewLead {
    pub fn into_lead(self, now: DateTime<Utc>) -> Lead {
        Lead {
            id: LeadId::generate(),
            external_id: self.external_id.filter(|value| !value.trim().is_empty()),
            full_name: self.full_name,
            email: self.email,
            phone: self.phone,
            source: self.source,
            stage: LeadStage::New,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{LeadSource, LeadStage, NewLead};
    use crate::errors::DomainError;

    #[test]
    fn closed_no_sale_never_maps_to_a_conversion_event() {
        assert_eq!(LeadStage::ClosedNoSale.conversion_event(), None);
        assert_eq!(LeadStage::ClosedSale.conversion_event(), Some("Purchase"));
    }

    #[test]
    fn every_other_stage_maps_to_an_event() {
        let mapped: Vec<_> = LeadStage::ALL
            .iter()
            .filter(|stage| **stage != LeadStage::ClosedNoSale)
            .map(|stage| stage.conversion_event())
            .collect();

        assert!(mapped.iter().all(Option::is_some));
    }

    #[test]
    fn legacy_stage_names_are_accepted() {
        assert_eq!("cerrado_venta".parse::<LeadStage>(), Ok(LeadStage::ClosedSale));
        assert_eq!("Nuevo".parse::<LeadStage>(), Ok(LeadStage::New));
        assert_eq!("closed-no-sale".parse::<LeadStage>(), Ok(LeadStage::ClosedNoSale));

        let decoded: LeadStage = serde_json::from_str("\"contactado\"").expect("alias decodes");
        assert_eq!(decoded, LeadStage::Contacted);
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let error = "won".parse::<LeadStage>().expect_err("unknown stage");
        assert_eq!(error, DomainError::UnknownStage("won".to_string()));
    }

    #[test]
    fn new_leads_start_in_new_stage_with_camel_case_json() {
        let lead = NewLead {
            external_id: Some("  ".to_string()),
            full_name: "Ana".to_string(),
            email: None,
            phone: Some("+34 600".to_string()),
            source: LeadSource::Manual,
        }
        .into_lead(Utc::now());

        assert_eq!(lead.stage, LeadStage::New);
        assert_eq!(lead.external_id, None, "blank external ids are not stored");

        let json = serde_json::to_value(&lead).expect("serialize lead");
        assert_eq!(json["fullName"], "Ana");
        assert_eq!(json["stage"], "new");
        assert_eq!(json["source"], "manual");
        assert!(json["leadId"].is_null());
        assert!(json.get("createdAt").is_some());
    }
}
