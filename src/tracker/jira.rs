//! Jira Cloud REST v3 client.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use super::{CommentId, Document, Issue, IssueKey, SearchPage, SearchQuery, Tracker, TrackerError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variables carrying the connection settings.
pub const ENV_HOST: &str = "JIRA_AGENT_HOST";
pub const ENV_EMAIL: &str = "JIRA_AGENT_EMAIL";
pub const ENV_TOKEN: &str = "JIRA_AGENT_TOKEN";

/// Connection settings for a Jira site.
#[derive(Clone)]
pub struct JiraCredentials {
    pub host: String,
    pub email: String,
    pub token: String,
}

impl std::fmt::Debug for JiraCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JiraCredentials")
            .field("host", &self.host)
            .field("email", &self.email)
            .field("token", &"<redacted>")
            .finish()
    }
}

pub struct JiraClient {
    base_url: String,
    authorization: String,
    agent: ureq::Agent,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    jql: &'a str,
    fields: &'a [String],
    max_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_page_token: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<Value>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Serialize)]
struct CommentRequest<'a> {
    body: &'a Document,
}

#[derive(Deserialize)]
struct CommentResponse {
    id: String,
}

impl JiraClient {
    pub fn new(credentials: &JiraCredentials) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();
        let basic = STANDARD.encode(format!("{}:{}", credentials.email, credentials.token));
        Self {
            base_url: normalize_host(&credentials.host),
            authorization: format!("Basic {basic}"),
            agent: ureq::Agent::new_with_config(config),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post_json<B: Serialize, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        operation: &str,
    ) -> Result<R, TrackerError> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, operation, "jira request");
        let mut response = self
            .agent
            .post(&url)
            .header("Authorization", &self.authorization)
            .header("Accept", "application/json")
            .send_json(body)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            error!(
                status = status.as_u16(),
                response_body = %body,
                operation,
                "jira request failed"
            );
            return Err(TrackerError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .body_mut()
            .read_json::<R>()
            .map_err(|e| TrackerError::Decode(format!("{operation}: {e}")))
    }
}

impl Tracker for JiraClient {
    fn search(&self, query: &SearchQuery) -> Result<SearchPage, TrackerError> {
        let request = SearchRequest {
            jql: &query.jql,
            fields: &query.fields,
            max_results: query.page_size,
            next_page_token: query.next_page_token.as_deref(),
        };
        let response: SearchResponse = self.post_json("/rest/api/3/search/jql", &request, "search")?;
        Ok(SearchPage {
            issues: parse_issues(response.issues),
            next_page_token: response.next_page_token,
        })
    }

    fn add_comment(&self, key: &IssueKey, body: &Document) -> Result<CommentId, TrackerError> {
        let path = format!("/rest/api/3/issue/{key}/comment");
        let response: CommentResponse =
            self.post_json(&path, &CommentRequest { body }, "add comment")?;
        Ok(CommentId(response.id))
    }
}

/// Decode a page of issues, skipping any the orchestrator cannot handle
/// (missing or malformed key) so one bad issue does not block the rest.
fn parse_issues(raw: Vec<Value>) -> Vec<Issue> {
    raw.into_iter()
        .filter_map(|value| match Issue::from_json(value) {
            Ok(issue) => Some(issue),
            Err(e) => {
                warn!(error = %e, "skipping issue in search results");
                None
            }
        })
        .collect()
}

/// Turn a configured host into a base URL: `https://` is assumed when no
/// scheme is given, and trailing slashes are dropped.
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn malformed_issue_keys_are_skipped_not_fatal() {
        let issues = parse_issues(vec![
            json!({"key": "A-1", "fields": {"summary": "first"}}),
            json!({"key": "../../etc", "fields": {"summary": "hostile"}}),
            json!({"fields": {"summary": "no key"}}),
            json!({"key": "A-3", "fields": {"summary": "third"}}),
        ]);
        let keys: Vec<_> = issues.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, ["A-1", "A-3"]);
    }

    #[test]
    fn normalize_host_adds_scheme_and_strips_slash() {
        assert_eq!(normalize_host("acme.atlassian.net"), "https://acme.atlassian.net");
        assert_eq!(
            normalize_host("https://acme.atlassian.net/"),
            "https://acme.atlassian.net"
        );
        assert_eq!(normalize_host("http://localhost:8080"), "http://localhost:8080");
    }

    #[test]
    fn authorization_is_basic_email_token() {
        let client = JiraClient::new(&JiraCredentials {
            host: "acme.atlassian.net".into(),
            email: "bot@acme.io".into(),
            token: "s3cret".into(),
        });
        assert_eq!(client.base_url(), "https://acme.atlassian.net");
        assert_eq!(
            client.authorization,
            format!("Basic {}", STANDARD.encode("bot@acme.io:s3cret"))
        );
    }

    #[test]
    fn credentials_debug_redacts_token() {
        let creds = JiraCredentials {
            host: "h".into(),
            email: "e".into(),
            token: "s3cret".into(),
        };
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("s3cret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn search_request_wire_shape() {
        let query = SearchQuery::for_label("agent-assign", 50);
        let first = SearchRequest {
            jql: &query.jql,
            fields: &query.fields,
            max_results: query.page_size,
            next_page_token: None,
        };
        let value = serde_json::to_value(&first).unwrap();
        assert_eq!(value["maxResults"], 50);
        assert_eq!(value["jql"], r#"labels = "agent-assign" ORDER BY created DESC"#);
        assert!(value.get("nextPageToken").is_none());

        let next = SearchRequest {
            next_page_token: Some("p2"),
            ..first
        };
        assert_eq!(serde_json::to_value(&next).unwrap()["nextPageToken"], "p2");
    }

    #[test]
    fn search_response_tolerates_missing_token() {
        let response: SearchResponse = serde_json::from_value(json!({
            "issues": [{"key": "A-1", "fields": {"summary": "one"}}],
            "isLast": true
        }))
        .unwrap();
        assert_eq!(response.issues.len(), 1);
        assert_eq!(response.next_page_token, None);
    }

    #[test]
    fn comment_request_wraps_document_in_body() {
        let doc = Document::paragraph("done");
        let value = serde_json::to_value(CommentRequest { body: &doc }).unwrap();
        assert_eq!(value["body"]["type"], "doc");
        assert_eq!(value["body"]["content"][0]["content"][0]["text"], "done");
    }
}
