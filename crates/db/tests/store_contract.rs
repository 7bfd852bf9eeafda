use std::sync::Arc;

use leadrelay_core::config::{StorageBackend, TableNames};
use leadrelay_core::domain::lead::{LeadSource, LeadStage, NewLead};
use leadrelay_core::domain::page::NewFacebookPage;
use leadrelay_db::{open_lead_store, CreateOutcome, LeadStore};
use secrecy::ExposeSecret;
use serde_json::json;

fn backends() -> Vec<(&'static str, StorageBackend)> {
    vec![
        ("memory", StorageBackend::Memory),
        (
            "sql",
            StorageBackend::Sql {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
                timeout_secs: 5,
            },
        ),
    ]
}

async fn open(backend: &StorageBackend) -> Arc<dyn LeadStore> {
    open_lead_store(backend, &TableNames::default()).await.expect("store should open")
}

fn facebook_lead(external_id: &str, name: &str) -> NewLead {
    NewLead {
        external_id: Some(external_id.to_string()),
        full_name: name.to_string(),
        email: Some(format!("{}@example.com", name.to_lowercase())),
        phone: None,
        source: LeadSource::Facebook,
    }
}

#[tokio::test]
async fn both_backends_deduplicate_on_external_id() {
    for (label, backend) in backends() {
        let store = open(&backend).await;

        let first = store.create_lead_if_absent(facebook_lead("lg-1", "Ana")).await.expect(label);
        let second = store.create_lead_if_absent(facebook_lead("lg-1", "Ana")).await.expect(label);

        assert!(matches!(first, CreateOutcome::Created(_)), "{label}: first insert");
        assert!(second.is_existing(), "{label}: second insert should be deduped");
        assert_eq!(first.lead().id, second.lead().id, "{label}");
        assert_eq!(store.list_leads().await.expect(label).len(), 1, "{label}");

        let found = store.find_lead_by_external_id("lg-1").await.expect(label);
        assert_eq!(found.map(|lead| lead.full_name), Some("Ana".to_string()), "{label}");
    }
}

#[tokio::test]
async fn both_backends_track_stage_and_event_history() {
    for (label, backend) in backends() {
        let store = open(&backend).await;
        let lead = store.create_lead(facebook_lead("lg-2", "Luis")).await.expect(label);
        assert_eq!(lead.stage, LeadStage::New, "{label}");

        let updated = store
            .update_lead_stage(&lead.id, LeadStage::Qualified)
            .await
            .expect(label)
            .expect("lead exists");
        assert_eq!(updated.stage, LeadStage::Qualified, "{label}");

        store.add_lead_event(&lead.id, "lead_ingested", json!({"source": "test"})).await.expect(label);
        store
            .add_lead_event(&lead.id, "meta_QualifiedLead", json!({"events_received": 1}))
            .await
            .expect(label);

        let names: Vec<String> = store
            .list_lead_events(&lead.id)
            .await
            .expect(label)
            .into_iter()
            .map(|event| event.event_name)
            .collect();
        assert_eq!(names, vec!["lead_ingested", "meta_QualifiedLead"], "{label}");
    }
}

#[tokio::test]
async fn both_backends_replace_page_tokens_on_reconnect() {
    for (label, backend) in backends() {
        let store = open(&backend).await;
        let connect = |token: &str, tenant: Option<&str>| NewFacebookPage {
            page_id: "page-9".to_string(),
            access_token: token.to_string().into(),
            name: Some("Clinic".to_string()),
            tenant_id: tenant.map(str::to_string),
        };

        store.upsert_facebook_page(connect("token-old", Some("acme"))).await.expect(label);
        store.upsert_facebook_page(connect("token-new", Some("globex"))).await.expect(label);

        let token = store.get_facebook_page_token("page-9").await.expect(label).expect("token");
        assert_eq!(token.expose_secret(), "token-new", "{label}");
        assert!(store.list_facebook_pages(Some("acme")).await.expect(label).is_empty(), "{label}");
        assert_eq!(store.list_facebook_pages(Some("globex")).await.expect(label).len(), 1, "{label}");
        assert_eq!(store.list_facebook_pages(None).await.expect(label).len(), 1, "{label}");
        assert!(store.get_facebook_page_token("unknown").await.expect(label).is_none(), "{label}");
    }
}
