use async_trait::async_trait;
use cb_domain::{Error, Result};

/// The only contract the command handler needs: turn a free-text query
/// into a single best-match URL. The concrete lookup is a pluggable
/// collaborator so tests can substitute a canned responder instead of
/// hitting a real search endpoint.
#[async_trait]
pub trait YoutubeSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Option<String>>;
}

/// Scrapes YouTube's own search results page for the first `/watch?v=`
/// link. No API key required; brittle to markup changes, which is the
/// tradeoff for not depending on a quota-limited Data API key.
pub struct HttpYoutubeSearch {
    http: reqwest::Client,
}

impl HttpYoutubeSearch {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("building youtube search HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl YoutubeSearch for HttpYoutubeSearch {
    async fn search(&self, query: &str) -> Result<Option<String>> {
        let url = format!(
            "https://www.youtube.com/results?search_query={}",
            urlencoding_encode(query)
        );
        let body = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Other(format!("youtube search request: {e}")))?
            .text()
            .await
            .map_err(|e| Error::Other(format!("youtube search body: {e}")))?;

        Ok(extract_first_video_id(&body).map(|id| format!("https://www.youtube.com/watch?v={id}")))
    }
}

fn urlencoding_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn extract_first_video_id(html: &str) -> Option<String> {
    let marker = "\"videoId\":\"";
    let start = html.find(marker)? + marker.len();
    let rest = &html[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_video_id_from_results_markup() {
        let html = r#"blah {"videoId":"abc123XYZ_-","otherStuff":true} more {"videoId":"second"}"#;
        assert_eq!(extract_first_video_id(html), Some("abc123XYZ_-".to_string()));
    }

    #[test]
    fn returns_none_when_no_video_id_present() {
        assert_eq!(extract_first_video_id("no matches here"), None);
    }

    #[test]
    fn encodes_spaces_and_special_characters() {
        assert_eq!(urlencoding_encode("rust async tutorial"), "rust+async+tutorial");
        assert_eq!(urlencoding_encode("c++"), "c%2B%2B");
    }

    struct CannedSearch(Option<&'static str>);

    #[async_trait]
    impl YoutubeSearch for CannedSearch {
        async fn search(&self, _query: &str) -> Result<Option<String>> {
            Ok(self.0.map(|s| s.to_string()))
        }
    }

    #[tokio::test]
    async fn canned_responder_satisfies_the_trait_for_tests() {
        let search = CannedSearch(Some("https://www.youtube.com/watch?v=test"));
        let result = search.search("anything").await.unwrap();
        assert_eq!(result.as_deref(), Some("https://www.youtube.com/watch?v=test"));
    }
}
