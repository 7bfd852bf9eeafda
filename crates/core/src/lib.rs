pub mod config;
pub mod conversions;
pub mod domain;
pub mod errors;
pub mod facebook;
pub mod oauth;
pub mod signature;

pub use config::{AppConfig, StorageBackend, TableNames};
pub use conversions::{
    build_outbound_event, hash_identifier, hash_phone, ConversionEventRequest,
    ConversionsDestination, ConversionsError, OutboundEvent,
};
pub use domain::event::LeadEvent;
pub use domain::lead::{Lead, LeadId, LeadSource, LeadStage, NewLead};
pub use domain::page::{FacebookPage, NewFacebookPage};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use facebook::{extract_leadgen_info, parse_lead_fields, LeadField, LeadgenInfo, ParsedLead};
pub use oauth::{OAuthState, OAuthStateError, OAuthStateStore};
pub use signature::verify_signature;
