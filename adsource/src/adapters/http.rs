use std::future::Future;

use ads::Advertisement;
use reqwest::Client;

use crate::error::SourceError;
use crate::protocol::AdSource;

const ACTIVE_ADS_PATH: &str = "/api/advertisements/active";

/// HTTP adapter for the active-advertisement endpoint.
pub struct HttpAdSource {
    http_client: Client,
    base_url: String,
}

impl HttpAdSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http_client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http_client,
            base_url,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, ACTIVE_ADS_PATH)
    }
}

impl AdSource for HttpAdSource {
    fn fetch_active(
        &self,
    ) -> impl Future<Output = Result<Vec<Advertisement>, SourceError>> + Send {
        async move {
            // Must always reach the origin, never a local HTTP cache.
            let response = self
                .http_client
                .get(self.endpoint())
                .header("Cache-Control", "no-cache")
                .header("Pragma", "no-cache")
                .send()
                .await
                .map_err(|err| SourceError::Transport(err.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(SourceError::Status(status.as_u16()));
            }

            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|err| SourceError::MalformedBody(err.to_string()))?;
            parse_active_ads(&body)
        }
    }
}

pub(crate) fn parse_active_ads(
    body: &serde_json::Value,
) -> Result<Vec<Advertisement>, SourceError> {
    let data = body
        .get("data")
        .ok_or_else(|| SourceError::MalformedBody("missing data field".to_string()))?;
    let items = data
        .as_array()
        .ok_or_else(|| SourceError::MalformedBody("data is not an array".to_string()))?;

    // Rows that fail to deserialize are skipped rather than failing the
    // whole list; promotional content is non-critical.
    let mut ads = Vec::with_capacity(items.len());
    for item in items {
        if let Ok(ad) = serde_json::from_value::<Advertisement>(item.clone()) {
            ads.push(ad);
        }
    }
    Ok(ads)
}

#[cfg(test)]
mod tests {
    use super::{parse_active_ads, HttpAdSource};
    use crate::error::SourceError;

    #[test]
    fn endpoint_joins_base_url_without_double_slash() {
        let source = HttpAdSource::new("https://shop.example/");
        assert_eq!(
            source.endpoint(),
            "https://shop.example/api/advertisements/active"
        );
    }

    #[test]
    fn well_formed_body_parses_all_rows() {
        let body: serde_json::Value = serde_json::from_str(
            r#"{"data":[
                {"advertisementId":1,"storeId":10,"storeName":"A","url":"https://cdn/1.png","link":"https://a.example"},
                {"advertisementId":2,"storeId":20,"storeName":"B","url":"https://cdn/2.png","link":null}
            ]}"#,
        )
        .expect("fixture should parse");

        let ads = parse_active_ads(&body).expect("body should parse");
        assert_eq!(ads.len(), 2);
        assert_eq!(ads[0].advertisement_id, 1);
        assert_eq!(ads[1].resolved_link(), "/store/20");
    }

    #[test]
    fn missing_data_field_is_malformed() {
        let body: serde_json::Value =
            serde_json::from_str(r#"{"rows":[]}"#).expect("fixture should parse");
        assert!(matches!(
            parse_active_ads(&body),
            Err(SourceError::MalformedBody(_))
        ));
    }

    #[test]
    fn non_array_data_is_malformed() {
        let body: serde_json::Value =
            serde_json::from_str(r#"{"data":"nope"}"#).expect("fixture should parse");
        assert!(matches!(
            parse_active_ads(&body),
            Err(SourceError::MalformedBody(_))
        ));
    }

    #[test]
    fn undeserializable_rows_are_skipped() {
        let body: serde_json::Value = serde_json::from_str(
            r#"{"data":[
                {"advertisementId":1,"storeId":10,"storeName":"A","url":"https://cdn/1.png"},
                {"bogus":true}
            ]}"#,
        )
        .expect("fixture should parse");

        let ads = parse_active_ads(&body).expect("body should parse");
        assert_eq!(ads.len(), 1);
    }

    #[test]
    fn empty_data_is_a_legitimate_empty_list() {
        let body: serde_json::Value =
            serde_json::from_str(r#"{"data":[]}"#).expect("fixture should parse");
        let ads = parse_active_ads(&body).expect("body should parse");
        assert!(ads.is_empty());
    }
}
