//! Pagination walker for Graph collection endpoints

use crate::graph::client::{GraphClient, GraphRequest};
use crate::graph::error::GraphError;
use serde_json::Value;

pub const NEXT_LINK: &str = "@odata.nextLink";
pub const COUNT: &str = "@odata.count";

/// Items gathered across one or more pages
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collected {
    pub items: Vec<Value>,
    pub pages: usize,
    /// False when the walk stopped at `max_pages` with more pages remaining
    pub complete: bool,
    /// `@odata.count` reported by the first page
    pub total_count: Option<i64>,
}

/// One decoded page of a collection response
struct Page {
    items: Vec<Value>,
    next_link: Option<String>,
    count: Option<i64>,
}

fn parse_page(body: Value) -> Result<Page, GraphError> {
    let Value::Object(mut map) = body else {
        return Err(GraphError::Decode(
            "Collection response is not a JSON object".to_string(),
        ));
    };

    let items = match map.remove("value") {
        Some(Value::Array(items)) => items,
        _ => {
            return Err(GraphError::Decode(
                "Collection response has no 'value' array".to_string(),
            ))
        }
    };

    let next_link = map
        .get(NEXT_LINK)
        .and_then(Value::as_str)
        .filter(|link| !link.is_empty())
        .map(String::from);
    let count = map.get(COUNT).and_then(Value::as_i64);

    Ok(Page {
        items,
        next_link,
        count,
    })
}

/// Fetch all pages of a collection, up to `max_pages`
///
/// Follow-up requests use the nextLink verbatim; the original query is not
/// re-applied. Request headers such as `ConsistencyLevel` carry over.
/// Any page failure fails the whole walk.
pub async fn collect(
    client: &GraphClient,
    request: GraphRequest,
    max_pages: Option<usize>,
) -> Result<Collected, GraphError> {
    let mut collected = Collected::default();
    let mut next = Some(request);

    while let Some(request) = next.take() {
        let body = client.request(&request).await?.json()?;
        let page = parse_page(body)?;
        collected.pages += 1;

        tracing::debug!(
            "Page {}: fetched {} records, next_link: {}",
            collected.pages,
            page.items.len(),
            page.next_link.is_some()
        );

        if collected.pages == 1 {
            collected.total_count = page.count;
        }
        collected.items.extend(page.items);

        match page.next_link {
            None => {
                collected.complete = true;
            }
            Some(_) if max_pages.is_some_and(|max| collected.pages >= max) => {
                tracing::info!(
                    "Stopping after {} pages, more results available",
                    collected.pages
                );
            }
            Some(link) => {
                let mut follow = GraphRequest::get(link);
                follow.headers = request.headers.clone();
                next = Some(follow);
            }
        }
    }

    tracing::info!(
        "Total records fetched: {} over {} pages",
        collected.items.len(),
        collected.pages
    );
    Ok(collected)
}
