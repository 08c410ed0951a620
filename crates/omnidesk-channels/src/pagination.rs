//! Cursor pagination for the Shopify Admin REST API.
//!
//! Each list response carries a `Link` header naming the adjacent pages:
//!
//! ```text
//! <https://shop.myshopify.com/admin/api/2024-01/orders.json?limit=250&page_info=PREV>; rel="previous",
//! <https://shop.myshopify.com/admin/api/2024-01/orders.json?limit=250&page_info=NEXT>; rel="next"
//! ```
//!
//! Follow-up requests must send only `limit` and `page_info`; Shopify rejects
//! the original filters once a cursor is present.

/// Returns the `page_info` cursor of the `rel="next"` link, or `None` on the
/// last page.
#[must_use]
pub fn next_page_info(link_header: Option<&str>) -> Option<String> {
    link_header?
        .split(',')
        .map(str::trim)
        .find(|segment| segment.contains(r#"rel="next""#))
        .and_then(link_target)
        .and_then(|url| query_value(url, "page_info"))
}

fn link_target(segment: &str) -> Option<&str> {
    let start = segment.find('<')? + 1;
    let end = segment.find('>')?;
    (start < end).then(|| &segment[start..end])
}

// Cursors are base64url, so no percent-decoding is needed.
fn query_value(url: &str, key: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.split('#').next().unwrap_or(v))
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_header_means_last_page() {
        assert!(next_page_info(None).is_none());
        assert!(next_page_info(Some("")).is_none());
    }

    #[test]
    fn picks_the_next_cursor_out_of_a_combined_header() {
        let header = concat!(
            r#"<https://s.myshopify.com/admin/api/2024-01/orders.json?limit=250&page_info=PREV>; rel="previous", "#,
            r#"<https://s.myshopify.com/admin/api/2024-01/orders.json?limit=250&page_info=NEXT>; rel="next""#
        );
        assert_eq!(next_page_info(Some(header)).as_deref(), Some("NEXT"));
    }

    #[test]
    fn previous_only_means_last_page() {
        let header =
            r#"<https://s.myshopify.com/admin/api/2024-01/orders.json?page_info=PREV>; rel="previous""#;
        assert!(next_page_info(Some(header)).is_none());
    }

    #[test]
    fn next_link_without_cursor_is_ignored() {
        let header = r#"<https://s.myshopify.com/admin/api/2024-01/orders.json?limit=250>; rel="next""#;
        assert!(next_page_info(Some(header)).is_none());
    }

    #[test]
    fn cursor_may_follow_other_params() {
        let header = r#"<https://s.myshopify.com/products.json?limit=50&fields=id&page_info=abc123>; rel="next""#;
        assert_eq!(next_page_info(Some(header)).as_deref(), Some("abc123"));
    }
}
