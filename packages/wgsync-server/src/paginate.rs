use url::form_urlencoded;
use wgsync_lib::constant::DEFAULT_PER_PAGE;

/// Zero-based page window. Out-of-range input is clamped rather than
/// rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: usize,
    pub per_page: usize,
}

impl Pagination {
    pub fn new(page: i64, per_page: i64) -> Self {
        let per_page = if per_page <= 0 {
            DEFAULT_PER_PAGE
        } else {
            per_page
        };
        Self {
            page: usize::try_from(page.max(0)).unwrap_or(usize::MAX),
            per_page: usize::try_from(per_page).unwrap_or(usize::MAX),
        }
    }

    /// The requested page of `items` and the total item count.
    pub fn apply<T>(&self, items: Vec<T>) -> (Vec<T>, usize) {
        let total = items.len();
        let start = self.page.saturating_mul(self.per_page);
        if start >= total {
            return (Vec::new(), total);
        }
        let page = items.into_iter().skip(start).take(self.per_page).collect();
        (page, total)
    }

    pub fn total_pages(&self, total: usize) -> usize {
        total.div_ceil(self.per_page)
    }
}

pub fn paginate<T>(items: Vec<T>, page: i64, per_page: i64) -> (Vec<T>, usize) {
    Pagination::new(page, per_page).apply(items)
}

/// Builds a GitHub-style `Link` header value for a paginated listing of
/// `uri`. Other query parameters are kept; `None` for an empty listing.
pub fn link_header(uri: &str, page: i64, per_page: i64, total: usize) -> Option<String> {
    if total == 0 {
        return None;
    }

    let window = Pagination::new(page, per_page);
    let last = window.total_pages(total) - 1;
    let (path, query) = uri.split_once('?').unwrap_or((uri, ""));
    let kept: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .filter(|(k, _)| k != "page" && k != "per_page")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let link = |page: usize, rel: &str| {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept.iter())
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &window.per_page.to_string())
            .finish();
        format!("<{path}?{query}>; rel=\"{rel}\"")
    };

    let mut links = vec![link(0, "first"), link(last, "last")];
    if window.page > 0 {
        links.push(link(window.page - 1, "prev"));
    }
    if window.page < last {
        links.push(link(window.page + 1, "next"));
    }

    Some(links.join(", "))
}
