//! URL construction.

use crate::model::{Id, TypeTag};
use url::form_urlencoded;

/// Query parameters, in the order the caller gave them.
pub type QueryParams = Vec<(String, String)>;

pub trait UrlBuilder: Send + Sync {
    fn build(&self, resource_type: &TypeTag, id: Option<&Id>, query: &[(String, String)]) -> String;
}

/// Emits `{base}/{type}[/{id}][?query]`.
#[derive(Debug, Clone, Default)]
pub struct DefaultUrlBuilder {
    base_url: String,
}

impl DefaultUrlBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl UrlBuilder for DefaultUrlBuilder {
    fn build(&self, resource_type: &TypeTag, id: Option<&Id>, query: &[(String, String)]) -> String {
        let mut url = format!("{}/{}", self.base_url, encode_segment(resource_type.as_str()));
        if let Some(id) = id {
            url.push('/');
            url.push_str(&encode_segment(&id.to_string()));
        }
        if !query.is_empty() {
            url.push('?');
            url.push_str(
                &form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(query)
                    .finish(),
            );
        }
        url
    }
}

fn encode_segment(segment: &str) -> String {
    form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}
