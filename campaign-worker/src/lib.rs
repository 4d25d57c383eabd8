//! Mailcast - email-campaign delivery pipeline.
//!
//! This library provides shared modules for the two Mailcast binaries:
//! - `mailcast-worker`: Delivery worker consuming the campaign queue
//! - `mailcast-web`: Tracking server for opens and clicks
//!
//! ## Architecture
//!
//! ```text
//! create_campaign → email_campaign.delayed → email_campaign → Worker → Mailer
//!                                                               ↓
//!                  Recipient → open pixel / click link → Web → campaign statistics
//! ```

pub mod blob;
pub mod campaign;
pub mod config;
pub mod links;
pub mod mailer;
pub mod queue;
pub mod shortlink;
pub mod shutdown;
pub mod store;
pub mod targets;
pub mod template;
pub mod web;
pub mod worker;

// Re-export commonly used types
pub use campaign::{create_campaign, Campaign, CampaignId, CampaignStatus, NewCampaign, TargetType};
pub use config::Config;
pub use queue::{CampaignJob, JobQueue, MemoryQueue, RabbitQueue, Recipient, CAMPAIGN_QUEUE};
pub use store::{Database, MemoryDatabase, MongoDatabase};
pub use web::AppState;
pub use worker::{Throttle, WorkerContext};
