//! Gmail API v1: list messages after the cursor, then fetch each in raw form.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::accounts::{MailboxAccount, Provider};
use crate::config::MailApiConfig;
use crate::error::MailApiError;
use crate::mail::body::{strip_html, strip_quoted_text};
use crate::mail::{MailApi, RemoteMessage, check_response, invalid_response, transport_error};
use crate::store::Direction;

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    /// Milliseconds since the epoch, as a decimal string.
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    raw: String,
}

// ============================================================================
// Client
// ============================================================================

pub struct GmailApi {
    config: MailApiConfig,
    http: reqwest::Client,
}

impl GmailApi {
    pub fn new(config: MailApiConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Every message id from the second of `since` on, newest first as
    /// Gmail lists them. `after:` is exclusive, so step back one second.
    async fn list_ids(&self, token: &str, since: DateTime<Utc>) -> Result<Vec<String>, MailApiError> {
        let url = format!("{}/gmail/v1/users/me/messages", self.config.base_url);
        let query = format!("after:{}", since.timestamp() - 1);
        let page_size = self.config.page_size.max(1).to_string();
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![("q", query.as_str()), ("maxResults", page_size.as_str())];
            if let Some(tok) = &page_token {
                params.push(("pageToken", tok.as_str()));
            }

            let resp = self
                .http
                .get(&url)
                .timeout(self.config.request_timeout)
                .bearer_auth(token)
                .query(&params)
                .send()
                .await
                .map_err(|e| transport_error(Provider::Gmail, e))?;
            let resp = check_response(Provider::Gmail, resp).await?;
            let page: MessageListResponse = resp
                .json()
                .await
                .map_err(|e| invalid_response(Provider::Gmail, e))?;

            ids.extend(page.messages.into_iter().map(|m| m.id));
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        Ok(ids)
    }

    async fn fetch_message(
        &self,
        token: &str,
        id: &str,
        own_address: &str,
    ) -> Result<Option<RemoteMessage>, MailApiError> {
        let url = format!("{}/gmail/v1/users/me/messages/{id}", self.config.base_url);
        let resp = self
            .http
            .get(&url)
            .timeout(self.config.request_timeout)
            .bearer_auth(token)
            .query(&[("format", "raw")])
            .send()
            .await
            .map_err(|e| transport_error(Provider::Gmail, e))?;
        let resp = check_response(Provider::Gmail, resp).await?;
        let message: RawMessage = resp
            .json()
            .await
            .map_err(|e| invalid_response(Provider::Gmail, e))?;

        parse_raw_message(message, own_address)
    }
}

#[async_trait]
impl MailApi for GmailApi {
    fn provider(&self) -> Provider {
        Provider::Gmail
    }

    async fn fetch_since(
        &self,
        account: &MailboxAccount,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>, MailApiError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let token = account.access_token.expose_secret();
        let mut ids = self.list_ids(token, since).await?;
        debug!(account_id = %account.id, count = ids.len(), "Gmail messages listed");

        // Keep the oldest `limit`; the cursor then stops short of the rest.
        let ids = ids.split_off(ids.len().saturating_sub(limit));

        // A message that fails to load fails the whole fetch, so the cursor
        // never moves past it.
        let mut messages = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(message) = self.fetch_message(token, id, &account.address).await? {
                messages.push(message);
            }
        }
        Ok(messages)
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn decode_raw(raw: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(raw.trim().trim_end_matches('='))
}

/// `Ok(None)` for a message with neither an internal date nor a `Date`
/// header; it cannot be placed against the sync cursor.
fn parse_raw_message(
    message: RawMessage,
    own_address: &str,
) -> Result<Option<RemoteMessage>, MailApiError> {
    let bytes = decode_raw(&message.raw)
        .map_err(|e| invalid_response(Provider::Gmail, format!("message {}: {e}", message.id)))?;
    let parsed = MessageParser::default().parse(&bytes).ok_or_else(|| {
        invalid_response(
            Provider::Gmail,
            format!("message {}: unparseable RFC 822 payload", message.id),
        )
    })?;

    let from = parsed
        .from()
        .and_then(|a| a.first())
        .and_then(|a| a.address())
        .unwrap_or_default()
        .to_string();
    let to = parsed
        .to()
        .and_then(|a| a.first())
        .and_then(|a| a.address())
        .unwrap_or_default()
        .to_string();

    let outbound = message.label_ids.iter().any(|l| l == "SENT")
        || (!own_address.is_empty() && from.eq_ignore_ascii_case(own_address));
    let (direction, correspondent) = if outbound {
        (Direction::Outbound, to)
    } else {
        (Direction::Inbound, from)
    };

    let text = if let Some(text) = parsed.body_text(0) {
        text.to_string()
    } else if let Some(html) = parsed.body_html(0) {
        strip_html(html.as_ref())
    } else {
        String::new()
    };

    let sent_at = message
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .or_else(|| {
            parsed
                .date()
                .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
        });
    let Some(sent_at) = sent_at else {
        warn!(external_id = %message.id, "Gmail message has no date, skipped");
        return Ok(None);
    };

    Ok(Some(RemoteMessage {
        external_id: message.id,
        subject: parsed.subject().unwrap_or_default().to_string(),
        body: strip_quoted_text(text.trim()),
        correspondent,
        sent_at,
        direction,
    }))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use mockito::Matcher;
    use secrecy::SecretString;

    use super::*;
    use crate::oauth::TokenPair;

    fn account() -> MailboxAccount {
        MailboxAccount::new(
            "user-1",
            Provider::Gmail,
            "me@gmail.com",
            TokenPair {
                access_token: SecretString::from("ya29.token"),
                refresh_token: None,
                expires_in: None,
            },
        )
    }

    fn encode(rfc822: &str) -> String {
        base64::engine::general_purpose::URL_SAFE.encode(rfc822.as_bytes())
    }

    fn raw_json(id: &str, labels: &[&str], internal_ms: i64, rfc822: &str) -> String {
        serde_json::json!({
            "id": id,
            "threadId": "t1",
            "labelIds": labels,
            "internalDate": internal_ms.to_string(),
            "raw": encode(rfc822),
        })
        .to_string()
    }

    const INBOUND: &str = "From: Boss <boss@example.com>\r\nTo: me@gmail.com\r\nSubject: Q3 report\r\nDate: Mon, 5 Oct 2026 09:00:00 +0000\r\nContent-Type: text/plain; charset=utf-8\r\n\r\nPlease send the Q3 report by Friday.\r\n\r\nOn Sun, Oct 4, 2026 at 8:00 AM Me <me@gmail.com> wrote:\r\n> earlier\r\n";

    const OUTBOUND: &str = "From: me@gmail.com\r\nTo: Client <client@example.com>\r\nSubject: Proposal\r\nContent-Type: text/html; charset=utf-8\r\n\r\n<p>I will send the <b>proposal</b> tomorrow.</p>\r\n";

    fn client_for(server: &mockito::ServerGuard) -> GmailApi {
        GmailApi::new(MailApiConfig::for_provider(Provider::Gmail).with_base_url(server.url()))
    }

    #[test]
    fn parse_inbound_text_message() {
        let message = RawMessage {
            id: "m1".into(),
            label_ids: vec!["INBOX".into()],
            internal_date: Some("1791190800000".into()),
            raw: encode(INBOUND),
        };
        let parsed = parse_raw_message(message, "me@gmail.com").unwrap().unwrap();
        assert_eq!(parsed.external_id, "m1");
        assert_eq!(parsed.subject, "Q3 report");
        assert_eq!(parsed.correspondent, "boss@example.com");
        assert_eq!(parsed.direction, Direction::Inbound);
        assert_eq!(parsed.body, "Please send the Q3 report by Friday.");
        assert_eq!(parsed.sent_at.timestamp_millis(), 1_791_190_800_000);
    }

    #[test]
    fn parse_sent_html_message() {
        let message = RawMessage {
            id: "m2".into(),
            label_ids: vec!["SENT".into()],
            internal_date: Some("1791194400000".into()),
            raw: encode(OUTBOUND),
        };
        let parsed = parse_raw_message(message, "me@gmail.com").unwrap().unwrap();
        assert_eq!(parsed.direction, Direction::Outbound);
        assert_eq!(parsed.correspondent, "client@example.com");
        let normalized = parsed.body.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(normalized, "I will send the proposal tomorrow.");
    }

    #[test]
    fn date_falls_back_to_header_and_undated_messages_are_skipped() {
        let dated = RawMessage {
            id: "m3".into(),
            label_ids: vec!["INBOX".into()],
            internal_date: None,
            raw: encode(INBOUND),
        };
        let parsed = parse_raw_message(dated, "me@gmail.com").unwrap().unwrap();
        assert_eq!(
            parsed.sent_at,
            Utc.with_ymd_and_hms(2026, 10, 5, 9, 0, 0).unwrap()
        );

        let undated = RawMessage {
            id: "m4".into(),
            label_ids: vec!["SENT".into()],
            internal_date: None,
            raw: encode(OUTBOUND),
        };
        assert!(parse_raw_message(undated, "me@gmail.com").unwrap().is_none());
    }

    #[test]
    fn garbage_payload_is_invalid_response() {
        let message = RawMessage {
            id: "bad".into(),
            label_ids: vec![],
            internal_date: None,
            raw: "***".into(),
        };
        let err = parse_raw_message(message, "me@gmail.com").unwrap_err();
        assert!(matches!(err, MailApiError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn fetch_since_lists_pages_and_fetches_raw() {
        let mut server = mockito::Server::new_async().await;
        let since = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();

        let page1 = server
            .mock("GET", "/gmail/v1/users/me/messages")
            .match_header("authorization", "Bearer ya29.token")
            .match_query(Matcher::AllOf(vec![
                Matcher::Regex(r"maxResults=\d+$".into()),
                // One second back so mail in the cursor's own second is listed.
                Matcher::UrlEncoded("q".into(), format!("after:{}", since.timestamp() - 1)),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"messages":[{"id":"m1","threadId":"t1"}],"nextPageToken":"p2"}"#)
            .create_async()
            .await;
        let page2 = server
            .mock("GET", "/gmail/v1/users/me/messages")
            .match_query(Matcher::UrlEncoded("pageToken".into(), "p2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"messages":[{"id":"m2","threadId":"t2"}]}"#)
            .create_async()
            .await;
        let _m1 = server
            .mock("GET", "/gmail/v1/users/me/messages/m1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(raw_json("m1", &["INBOX"], 1_791_190_800_000, INBOUND))
            .create_async()
            .await;
        let _m2 = server
            .mock("GET", "/gmail/v1/users/me/messages/m2")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(raw_json("m2", &["SENT"], 1_791_194_400_000, OUTBOUND))
            .create_async()
            .await;

        let messages = client_for(&server)
            .fetch_since(&account(), since, 10)
            .await
            .unwrap();
        page1.assert_async().await;
        page2.assert_async().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].external_id, "m1");
        assert_eq!(messages[1].direction, Direction::Outbound);
    }

    #[tokio::test]
    async fn expired_token_is_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        let _list = server
            .mock("GET", "/gmail/v1/users/me/messages")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"error":{"code":401,"message":"Invalid Credentials"}}"#)
            .create_async()
            .await;

        let err = client_for(&server)
            .fetch_since(&account(), Utc::now(), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, MailApiError::Unauthorized { provider: Provider::Gmail }));
    }

    #[tokio::test]
    async fn failed_message_fetch_fails_the_batch() {
        let mut server = mockito::Server::new_async().await;
        let _list = server
            .mock("GET", "/gmail/v1/users/me/messages")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"messages":[{"id":"m1"}]}"#)
            .create_async()
            .await;
        let _m1 = server
            .mock("GET", "/gmail/v1/users/me/messages/m1")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let err = client_for(&server)
            .fetch_since(&account(), Utc::now(), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, MailApiError::Http { status: 500, .. }));
    }
}
