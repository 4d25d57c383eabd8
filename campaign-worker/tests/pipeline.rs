//! Campaign lifecycle from creation through delivery and tracking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header::LOCATION, Request, StatusCode};
use reqwest::Client;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mailcast::blob::{BlobMetadata, BlobStorage, UploadedBlob};
use mailcast::campaign::CreationSettings;
use mailcast::mailer::{Mailer, SendOutcome, SendRequest};
use mailcast::targets::Segment;
use mailcast::template::Template;
use mailcast::web::{router, AppState};
use mailcast::worker::{self, DeliverySettings, DeliveryOutcome, Throttle, WorkerContext};
use mailcast::{
    create_campaign, CampaignStatus, Database, JobQueue, MemoryDatabase, MemoryQueue, NewCampaign,
    Recipient, TargetType,
};

const PUBLIC_BASE: &str = "https://track.example.com";

#[derive(Default)]
struct InboxMailer {
    sent: Mutex<Vec<SendRequest>>,
}

#[async_trait]
impl Mailer for InboxMailer {
    async fn send(&self, request: &SendRequest) -> SendOutcome {
        self.sent.lock().unwrap().push(request.clone());
        SendOutcome::sent()
    }
}

struct LocalBlobs;

#[async_trait]
impl BlobStorage for LocalBlobs {
    async fn upload(&self, path: &Path, metadata: &BlobMetadata) -> Result<UploadedBlob> {
        assert!(tokio::fs::metadata(path).await?.is_file());
        Ok(UploadedBlob {
            url: format!("https://blob.example.com/{}", metadata.key),
        })
    }
}

/// Strip the public base so the path can be sent through the router.
fn route_path(url: &str) -> &str {
    url.strip_prefix(PUBLIC_BASE).unwrap()
}

#[tokio::test]
async fn test_campaign_lifecycle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/templates/launch.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<p>Hi {{name}}, <a href=\"{{action_link}}\">order</a></p>"),
        )
        .mount(&server)
        .await;

    let db = Arc::new(MemoryDatabase::new());
    db.add_template(Template::new(
        "tpl-launch",
        "launch.html",
        format!("{}/templates/launch.html", server.uri()),
    ));
    db.add_recipient(Segment::Users, Recipient::new("u1", "Ana", "ana@example.com"), true);
    db.add_recipient(Segment::Users, Recipient::new("u2", "Bo", "bo@example.com"), true);
    db.add_recipient(Segment::Users, Recipient::new("u3", "Cy", "cy@example.com"), false);

    let queue = MemoryQueue::new();
    let http = Client::new();
    let settings = CreationSettings {
        public_base_url: PUBLIC_BASE.to_string(),
        short_code_length: 8,
    };

    let campaign = create_campaign(
        db.as_ref(),
        &queue,
        &http,
        &settings,
        NewCampaign {
            name: "Launch".to_string(),
            subject: "We deliver now".to_string(),
            template_id: "tpl-launch".to_string(),
            target: TargetType::Users,
            schedule_time: None,
            custom_link: Some("https://order.example.com/start".to_string()),
            recipient_file_url: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(queue.len(), 1);

    let scratch = tempfile::tempdir().unwrap();
    let mailer = Arc::new(InboxMailer::default());
    let ctx = Arc::new(WorkerContext {
        db: db.clone(),
        mailer: mailer.clone(),
        blobs: Arc::new(LocalBlobs),
        http,
        throttle: Arc::new(Throttle::unlimited()),
        settings: DeliverySettings {
            public_base_url: PUBLIC_BASE.to_string(),
            scratch_dir: scratch.path().to_path_buf(),
        },
    });

    let claimed = queue.dequeue().await.unwrap().unwrap();
    let outcome = worker::process(&ctx, claimed).await;
    assert!(matches!(outcome, DeliveryOutcome::Succeeded(_)));
    assert!(queue.is_empty());

    let stored = db.campaign(&campaign.id).unwrap();
    assert_eq!(stored.status, CampaignStatus::Success);
    assert_eq!(stored.statistics.sent, 2);
    assert_eq!(stored.statistics.delivered, 2);
    assert!(stored.report_url.is_some());
    assert!(stored.error_message.is_none());

    let sent = mailer.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);

    // Recipients open the mail and follow the link.
    let app = router(AppState::new(db.clone(), "https://www.example.com/"));
    for request in &sent {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(route_path(&request.tracking_pixel_url))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let click = sent[0].action_link.as_deref().unwrap();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(route_path(click))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "https://order.example.com/start");

    let stored = db.campaign(&campaign.id).unwrap();
    assert_eq!(stored.status, CampaignStatus::Success);
    assert_eq!(stored.statistics.opens.len(), 2);
    assert_eq!(stored.statistics.clicks.len(), 1);
    assert_eq!(stored.statistics.clicks[0].email, "ana@example.com");

    // A redelivered job for a finished campaign sends nothing.
    let job = mailcast::CampaignJob {
        recipients: vec![Recipient::new("u1", "Ana", "ana@example.com")],
        custom_link_base: None,
        template_id: "tpl-launch".to_string(),
        schedule_time: None,
        campaign_id: campaign.id.clone(),
        subject: "We deliver now".to_string(),
    };
    assert_eq!(worker::deliver(&ctx, &job).await, DeliveryOutcome::Skipped);
    assert_eq!(mailer.sent.lock().unwrap().len(), 2);
    assert_eq!(
        db.campaigns().fetch_campaign(&campaign.id).await.unwrap().unwrap().statistics.sent,
        2
    );
}
