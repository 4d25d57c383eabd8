//! Recipient resolution for campaign targets.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::campaign::TargetType;
use crate::queue::Recipient;
use crate::store::{RecipientDirectory, StoreError};

/// A stored user segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Users,
    Admins,
    Waitlist,
}

impl TargetType {
    /// Stored segment for this target, if it is not an uploaded file.
    pub fn segment(&self) -> Option<Segment> {
        match self {
            TargetType::Users => Some(Segment::Users),
            TargetType::Admins => Some(Segment::Admins),
            TargetType::Waitlist => Some(Segment::Waitlist),
            TargetType::UploadedFile => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to query recipients: {0}")]
    Store(#[from] StoreError),
    #[error("failed to fetch recipient file: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("uploaded-file target requires a recipient file url")]
    MissingFileUrl,
}

/// Compute the recipient list for a campaign target.
#[tracing::instrument(skip(directory, http))]
pub async fn resolve_recipients(
    directory: &dyn RecipientDirectory,
    http: &Client,
    target: TargetType,
    file_url: Option<&str>,
) -> Result<Vec<Recipient>, ResolveError> {
    let recipients = match target.segment() {
        Some(segment) => directory.active_recipients(segment).await?,
        None => {
            let url = file_url
                .filter(|u| !u.trim().is_empty())
                .ok_or(ResolveError::MissingFileUrl)?;
            let body = http
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?;
            parse_recipient_file(&body)
        }
    };

    info!(target = ?target, recipients = recipients.len(), "recipients_resolved");

    Ok(recipients)
}

/// Parse an uploaded `email,name` file. The first line is a header.
///
/// Missing columns become empty strings; blank lines are ignored.
pub fn parse_recipient_file(content: &str) -> Vec<Recipient> {
    content
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(index, line)| {
            let mut columns = line.split(',');
            let email = columns.next().unwrap_or("").trim();
            let name = columns.next().unwrap_or("").trim();
            Recipient::new((index + 1).to_string(), name, email)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Database, MemoryDatabase};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_recipient_file() {
        let content = "email,name\r\n ana@example.com , Ana \r\nbo@example.com,Bo\r\n\r\n";
        let recipients = parse_recipient_file(content);
        assert_eq!(
            recipients,
            vec![
                Recipient::new("1", "Ana", "ana@example.com"),
                Recipient::new("2", "Bo", "bo@example.com"),
            ]
        );
    }

    #[test]
    fn test_parse_recipient_file_missing_columns() {
        let recipients = parse_recipient_file("email,name\nonly@example.com\n,\n");
        assert_eq!(recipients[0].email, "only@example.com");
        assert_eq!(recipients[0].name, "");
        assert_eq!(recipients[1].email, "");
        assert_eq!(recipients[1].name, "");
    }

    #[test]
    fn test_parse_recipient_file_header_only() {
        assert!(parse_recipient_file("email,name").is_empty());
        assert!(parse_recipient_file("").is_empty());
    }

    #[tokio::test]
    async fn test_resolve_stored_segment() {
        let db = MemoryDatabase::new();
        db.add_recipient(Segment::Waitlist, Recipient::new("w1", "Wes", "wes@example.com"), true);

        let recipients = resolve_recipients(db.recipients(), &Client::new(), TargetType::Waitlist, None)
            .await
            .unwrap();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].email, "wes@example.com");
    }

    #[tokio::test]
    async fn test_resolve_uploaded_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uploads/list.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string("email,name\ncy@example.com,Cy\n"))
            .mount(&server)
            .await;

        let db = MemoryDatabase::new();
        let url = format!("{}/uploads/list.csv", server.uri());
        let recipients = resolve_recipients(
            db.recipients(),
            &Client::new(),
            TargetType::UploadedFile,
            Some(&url),
        )
        .await
        .unwrap();

        assert_eq!(recipients, vec![Recipient::new("1", "Cy", "cy@example.com")]);
    }

    #[tokio::test]
    async fn test_resolve_unreachable_file_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let db = MemoryDatabase::new();
        let url = format!("{}/missing.csv", server.uri());
        let result = resolve_recipients(
            db.recipients(),
            &Client::new(),
            TargetType::UploadedFile,
            Some(&url),
        )
        .await;
        assert!(matches!(result, Err(ResolveError::Fetch(_))));
    }

    #[tokio::test]
    async fn test_resolve_uploaded_file_without_url() {
        let db = MemoryDatabase::new();
        let result =
            resolve_recipients(db.recipients(), &Client::new(), TargetType::UploadedFile, None).await;
        assert!(matches!(result, Err(ResolveError::MissingFileUrl)));
    }
}
