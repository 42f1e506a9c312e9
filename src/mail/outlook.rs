//! Microsoft Graph mail: `me/messages` filtered by received time, oldest
//! first, following `@odata.nextLink` until the limit is reached.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::accounts::{MailboxAccount, Provider};
use crate::config::MailApiConfig;
use crate::error::MailApiError;
use crate::mail::body::{strip_html, strip_quoted_text};
use crate::mail::{MailApi, RemoteMessage, check_response, invalid_response, transport_error};
use crate::store::Direction;

const SELECT_FIELDS: &str = "id,subject,body,from,toRecipients,receivedDateTime";

#[derive(Debug, Deserialize)]
struct MessagePage {
    #[serde(default)]
    value: Vec<GraphMessage>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body: Option<ItemBody>,
    #[serde(default)]
    from: Option<Recipient>,
    #[serde(default)]
    to_recipients: Vec<Recipient>,
    #[serde(default)]
    received_date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemBody {
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Recipient {
    email_address: EmailAddress,
}

#[derive(Debug, Deserialize)]
struct EmailAddress {
    #[serde(default)]
    address: String,
}

pub struct OutlookApi {
    config: MailApiConfig,
    http: reqwest::Client,
}

impl OutlookApi {
    pub fn new(config: MailApiConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    async fn get_page(
        &self,
        request: reqwest::RequestBuilder,
        token: &str,
    ) -> Result<MessagePage, MailApiError> {
        let resp = request
            .timeout(self.config.request_timeout)
            .bearer_auth(token)
            .header("Prefer", "outlook.body-content-type=\"text\"")
            .send()
            .await
            .map_err(|e| transport_error(Provider::Outlook, e))?;
        let resp = check_response(Provider::Outlook, resp).await?;
        resp.json()
            .await
            .map_err(|e| invalid_response(Provider::Outlook, e))
    }
}

#[async_trait]
impl MailApi for OutlookApi {
    fn provider(&self) -> Provider {
        Provider::Outlook
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
        let filter = format!(
            "receivedDateTime ge {}",
            since.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let top = self.config.page_size.min(limit).max(1).to_string();

        let first = self
            .http
            .get(format!("{}/v1.0/me/messages", self.config.base_url))
            .query(&[
                ("$filter", filter.as_str()),
                ("$orderby", "receivedDateTime asc"),
                ("$top", top.as_str()),
                ("$select", SELECT_FIELDS),
            ]);
        let mut page = self.get_page(first, token).await?;

        let mut messages = Vec::new();
        loop {
            for message in page.value {
                if messages.len() >= limit {
                    break;
                }
                if let Some(message) = to_remote(message, &account.address) {
                    messages.push(message);
                }
            }
            match page.next_link {
                Some(link) if messages.len() < limit => {
                    page = self.get_page(self.http.get(link), token).await?;
                }
                _ => break,
            }
        }

        debug!(account_id = %account.id, count = messages.len(), "Graph messages fetched");
        Ok(messages)
    }
}

/// `None` for messages without a usable `receivedDateTime`; they cannot be
/// placed against the sync cursor.
fn to_remote(message: GraphMessage, own_address: &str) -> Option<RemoteMessage> {
    let Some(sent_at) = message
        .received_date_time
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
    else {
        warn!(external_id = %message.id, "Graph message has no receive time, skipped");
        return None;
    };

    let from = message
        .from
        .map(|r| r.email_address.address)
        .unwrap_or_default();
    let outbound = !own_address.is_empty() && from.eq_ignore_ascii_case(own_address);
    let (direction, correspondent) = if outbound {
        let to = message
            .to_recipients
            .into_iter()
            .next()
            .map(|r| r.email_address.address)
            .unwrap_or_default();
        (Direction::Outbound, to)
    } else {
        (Direction::Inbound, from)
    };

    let text = match message.body {
        Some(body) if body.content_type.eq_ignore_ascii_case("html") => strip_html(&body.content),
        Some(body) => body.content,
        None => String::new(),
    };

    Some(RemoteMessage {
        external_id: message.id,
        subject: message.subject.unwrap_or_default(),
        body: strip_quoted_text(text.trim()),
        correspondent,
        sent_at,
        direction,
    })
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
            Provider::Outlook,
            "me@contoso.com",
            TokenPair {
                access_token: SecretString::from("eyJ0"),
                refresh_token: None,
                expires_in: None,
            },
        )
    }

    fn client_for(server: &mockito::ServerGuard) -> OutlookApi {
        OutlookApi::new(MailApiConfig::for_provider(Provider::Outlook).with_base_url(server.url()))
    }

    #[tokio::test]
    async fn fetch_since_filters_and_follows_next_link() {
        let mut server = mockito::Server::new_async().await;
        let since = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
        let next_link = format!("{}/v1.0/me/messages?$skiptoken=abc", server.url());

        let page1 = server
            .mock("GET", "/v1.0/me/messages")
            .match_header("authorization", "Bearer eyJ0")
            .match_header("prefer", "outlook.body-content-type=\"text\"")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded(
                    "$filter".into(),
                    "receivedDateTime ge 2026-10-01T00:00:00Z".into(),
                ),
                Matcher::UrlEncoded("$orderby".into(), "receivedDateTime asc".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "value": [{
                        "id": "AAMk1",
                        "subject": "Contract",
                        "body": {"contentType": "text", "content": "Can you sign the contract?\r\n\r\nOn Fri, Oct 2, 2026 Bob wrote:\r\nold"},
                        "from": {"emailAddress": {"address": "bob@partner.com", "name": "Bob"}},
                        "toRecipients": [{"emailAddress": {"address": "me@contoso.com"}}],
                        "receivedDateTime": "2026-10-04T09:00:00Z"
                    }],
                    "@odata.nextLink": next_link,
                })
                .to_string(),
            )
            .create_async()
            .await;
        let page2 = server
            .mock("GET", "/v1.0/me/messages")
            .match_query(Matcher::UrlEncoded("$skiptoken".into(), "abc".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "value": [{
                        "id": "AAMk2",
                        "subject": "Re: Invoice",
                        "body": {"contentType": "html", "content": "<p>I&apos;ll pay <b>today</b></p>"},
                        "from": {"emailAddress": {"address": "ME@contoso.com"}},
                        "toRecipients": [{"emailAddress": {"address": "billing@vendor.com"}}],
                        "receivedDateTime": "2026-10-05T09:00:00Z"
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let messages = client_for(&server)
            .fetch_since(&account(), since, 10)
            .await
            .unwrap();
        page1.assert_async().await;
        page2.assert_async().await;

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].external_id, "AAMk1");
        assert_eq!(messages[0].direction, Direction::Inbound);
        assert_eq!(messages[0].correspondent, "bob@partner.com");
        assert_eq!(messages[0].body, "Can you sign the contract?");
        assert_eq!(
            messages[0].sent_at,
            Utc.with_ymd_and_hms(2026, 10, 4, 9, 0, 0).unwrap()
        );

        assert_eq!(messages[1].direction, Direction::Outbound);
        assert_eq!(messages[1].correspondent, "billing@vendor.com");
        assert!(messages[1].body.contains("today"));
    }

    #[tokio::test]
    async fn limit_stops_paging() {
        let mut server = mockito::Server::new_async().await;
        let next_link = format!("{}/v1.0/me/messages?$skiptoken=more", server.url());
        let _page1 = server
            .mock("GET", "/v1.0/me/messages")
            .match_query(Matcher::UrlEncoded("$top".into(), "1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "value": [{"id": "A1", "receivedDateTime": "2026-10-05T09:00:00Z"}],
                    "@odata.nextLink": next_link,
                })
                .to_string(),
            )
            .create_async()
            .await;
        let page2 = server
            .mock("GET", "/v1.0/me/messages")
            .match_query(Matcher::UrlEncoded("$skiptoken".into(), "more".into()))
            .expect(0)
            .create_async()
            .await;

        let messages = client_for(&server)
            .fetch_since(&account(), Utc::now(), 1)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        page2.assert_async().await;
    }

    #[tokio::test]
    async fn messages_without_receive_time_are_skipped() {
        let mut server = mockito::Server::new_async().await;
        let _page = server
            .mock("GET", "/v1.0/me/messages")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "value": [
                        {"id": "AAMk1", "subject": "Draft"},
                        {"id": "AAMk2", "subject": "Budget", "receivedDateTime": "2026-10-06T08:15:00Z"}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let messages = client_for(&server)
            .fetch_since(&account(), Utc::now(), 10)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].external_id, "AAMk2");
    }

    #[tokio::test]
    async fn unauthorized_maps_to_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1.0/me/messages")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let err = client_for(&server)
            .fetch_since(&account(), Utc::now(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, MailApiError::Unauthorized { provider: Provider::Outlook }));
    }
}
