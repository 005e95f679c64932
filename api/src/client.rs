use crate::openliga::OpenLigaMatchHeader;
use crate::{ApiError, ApiResult};
use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;

pub const OPENLIGA_API: &str = "https://www.openligadb.de/api";
pub const DEFAULT_LEAGUE: &str = "bl1";

/// Where per-season match documents come from.
///
/// The orchestrator runs one `fetch_season` per requested season on its own
/// task, so implementations must be shareable across threads.
pub trait DocumentSource: Send + Sync + 'static {
    fn fetch_season(
        &self,
        league: &str,
        season: i32,
    ) -> impl Future<Output = ApiResult<serde_json::Value>> + Send;
}

/// OpenLigaDB client.
#[derive(Debug, Clone)]
pub struct OpenLigaClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl Default for OpenLigaClient {
    fn default() -> Self {
        Self {
            client: Client::builder()
                .user_agent("matchday/0.1 (season downloader)")
                .build()
                .unwrap_or_default(),
            base_url: OPENLIGA_API.to_owned(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// The league's current matchday, read off the first record of the
/// current-matchday document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentMatchday {
    pub season: Option<i32>,
    pub league_name: Option<String>,
    pub group_id: i64,
    pub group_order: i64,
    pub group_name: String,
}

impl OpenLigaClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn season_url(&self, league: &str, season: i32) -> String {
        format!("{}/getmatchdata/{league}/{season}", self.base_url)
    }

    /// Fetch every match of one season as an undecoded JSON document.
    pub async fn fetch_matches(&self, league: &str, season: i32) -> ApiResult<serde_json::Value> {
        let url = self.season_url(league, season);
        debug!("fetching {url}");
        self.get(&url).await
    }

    pub async fn fetch_current_matchday(&self, league: &str) -> ApiResult<CurrentMatchday> {
        let url = format!("{}/getmatchdata/{league}", self.base_url);
        let raw: Vec<OpenLigaMatchHeader> = self.get(&url).await?;
        let first = raw
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound(format!("no current matchday for league {league}")))?;
        Ok(map_current_matchday(first))
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> ApiResult<T> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ApiError::Network(e, url.to_owned()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16(), url.to_owned()));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Parsing(e, url.to_owned()))
    }
}

impl DocumentSource for OpenLigaClient {
    async fn fetch_season(&self, league: &str, season: i32) -> ApiResult<serde_json::Value> {
        self.fetch_matches(league, season).await
    }
}

fn map_current_matchday(header: OpenLigaMatchHeader) -> CurrentMatchday {
    CurrentMatchday {
        season: header.league_season,
        league_name: header.league_name,
        group_id: header.group.group_id,
        group_order: header.group.group_order_id,
        group_name: header.group.group_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEASON_BODY: &str = r#"[
        {"MatchID": 1, "Team1": {"TeamId": 40}, "Team2": {"TeamId": 7}},
        {"MatchID": 2, "Team1": {"TeamId": 7}, "Team2": {"TeamId": 40}}
    ]"#;

    fn client_for(server: &mockito::Server) -> OpenLigaClient {
        OpenLigaClient::new().with_base_url(server.url())
    }

    #[test]
    fn season_url_is_templated_on_league_and_season() {
        let client = OpenLigaClient::new().with_base_url("http://localhost:1234/api/");
        assert_eq!(
            client.season_url("bl2", 2016),
            "http://localhost:1234/api/getmatchdata/bl2/2016"
        );
    }

    #[tokio::test]
    async fn fetch_matches_returns_the_decoded_document() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/getmatchdata/bl1/2016")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(SEASON_BODY)
            .create_async()
            .await;

        let doc = client_for(&server).fetch_matches("bl1", 2016).await.unwrap();
        mock.assert_async().await;
        assert_eq!(doc.as_array().map(Vec::len), Some(2));
        assert_eq!(doc[1]["MatchID"], 2);
    }

    #[tokio::test]
    async fn server_errors_are_transport_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/getmatchdata/bl1/2016")
            .with_status(500)
            .create_async()
            .await;

        let err = client_for(&server).fetch_matches("bl1", 2016).await.unwrap_err();
        assert!(matches!(err, ApiError::Status(500, _)), "{err}");
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn not_found_is_not_swallowed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/getmatchdata/xx/2016")
            .with_status(404)
            .create_async()
            .await;

        let err = client_for(&server).fetch_matches("xx", 2016).await.unwrap_err();
        assert!(matches!(err, ApiError::Status(404, ref url) if url.ends_with("/getmatchdata/xx/2016")), "{err}");
    }

    #[tokio::test]
    async fn malformed_json_is_a_parse_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/getmatchdata/bl1/2016")
            .with_status(200)
            .with_body("[{\"MatchID\": ")
            .create_async()
            .await;

        let err = client_for(&server).fetch_matches("bl1", 2016).await.unwrap_err();
        assert!(matches!(err, ApiError::Parsing(..)), "{err}");
    }

    #[tokio::test]
    async fn current_matchday_reads_the_first_record() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/getmatchdata/bl1")
            .with_status(200)
            .with_body(
                r#"[
                    {"MatchID": 10, "LeagueSeason": 2017, "LeagueName": "1. Fussball-Bundesliga 2017/2018",
                     "Group": {"GroupID": 28947, "GroupOrderID": 9, "GroupName": "9. Spieltag"}},
                    {"MatchID": 11, "LeagueSeason": 2017,
                     "Group": {"GroupID": 28947, "GroupOrderID": 9, "GroupName": "9. Spieltag"}}
                ]"#,
            )
            .create_async()
            .await;

        let current = client_for(&server).fetch_current_matchday("bl1").await.unwrap();
        assert_eq!(
            current,
            CurrentMatchday {
                season: Some(2017),
                league_name: Some("1. Fussball-Bundesliga 2017/2018".into()),
                group_id: 28947,
                group_order: 9,
                group_name: "9. Spieltag".into(),
            }
        );
    }

    #[tokio::test]
    async fn empty_current_matchday_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/getmatchdata/bl1")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let err = client_for(&server).fetch_current_matchday("bl1").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
