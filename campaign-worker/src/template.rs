//! Email templates referenced by campaign jobs.
//!
//! Templates are authored elsewhere; the worker only looks them up by id and
//! downloads the stored body.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "_id")]
    pub id: String,
    /// File name of the stored body, e.g. `spring-menu.html`.
    pub file_name: String,
    /// Retrievable URL of the stored body.
    pub url: String,
}

impl Template {
    pub fn new(id: impl Into<String>, file_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.into(),
            url: url.into(),
        }
    }

    /// File name safe to join onto a scratch directory.
    pub fn scratch_name(&self) -> String {
        let name: String = self
            .file_name
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '_',
                c => c,
            })
            .collect();
        match name.trim_matches('.') {
            "" => "template.html".to_string(),
            _ => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_name_strips_separators() {
        let template = Template::new("t", "../../etc/passwd", "http://x");
        assert!(!template.scratch_name().contains('/'));
        assert_eq!(Template::new("t", "..", "http://x").scratch_name(), "template.html");
        assert_eq!(Template::new("t", "menu.html", "http://x").scratch_name(), "menu.html");
    }
}
