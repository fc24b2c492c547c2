//! Many identities resolved at once must not bleed into each other.

mod common;

use chrono::Utc;
use common::{test_config, TestApp};
use entitlement_service::{
    models::{Email, MembershipStatus, PurchaseRecord},
    services::store::PurchaseMirror,
};
use serde_json::json;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Paid subscriber for even-numbered members, not found for odd ones.
struct NumberedSubscribers;

impl Respond for NumberedSubscribers {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let index = request
            .url
            .path()
            .rsplit('/')
            .next()
            .and_then(|last| last.strip_prefix("member"))
            .and_then(|rest| rest.split("%40").next())
            .and_then(|n| n.parse::<usize>().ok());

        match index {
            Some(i) if i % 2 == 0 => ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "id": format!("sub_{}", i),
                    "status": "active",
                    "subscription_tier": "paid",
                }
            })),
            _ => ResponseTemplate::new(404),
        }
    }
}

fn email(i: usize) -> String {
    format!("member{}@example.com", i)
}

#[tokio::test]
async fn fifty_concurrent_identities_resolve_independently() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(NumberedSubscribers)
        .mount(&server)
        .await;
    let app = TestApp::new(test_config(&server.uri()));

    for i in (0..50).filter(|i| i % 3 == 0) {
        app.store
            .upsert_purchase(&PurchaseRecord {
                email: Email::parse(&email(i)).unwrap(),
                membership_id: format!("mem_{}", i),
                product_id: Some(common::PRODUCT_ID.to_string()),
                purchase_reference: Some(format!("rcpt_{}", i)),
                tier_hint: None,
                status: MembershipStatus::Active,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    let app = std::sync::Arc::new(app);
    let handles: Vec<_> = (0..50)
        .map(|i| {
            let app = app.clone();
            tokio::spawn(async move {
                let (_, body) = app.post_json("/verify", json!({"email": email(i)})).await;
                (i, body)
            })
        })
        .collect();

    for handle in handles {
        let (i, body) = handle.await.unwrap();
        let (tier, source) = match (i % 2 == 0, i % 3 == 0) {
            (true, true) => ("premium", "both"),
            (false, true) => ("premium", "marketplace"),
            (true, false) => ("paid", "newsletter"),
            (false, false) => ("free", "none"),
        };
        assert_eq!(body["tier"], tier, "member{i}");
        assert_eq!(body["source"], source, "member{i}");

        if source == "none" {
            assert!(body.get("session_token").is_none());
            continue;
        }

        let (_, session) = app
            .post_json("/session/introspect", json!({"token": body["session_token"]}))
            .await;
        assert_eq!(session["identity"], email(i));
        assert_eq!(session["tier"], tier);
    }

    // 25 even plus the 8 odd multiples of three.
    assert_eq!(app.store.identity_count(), 33);
}
