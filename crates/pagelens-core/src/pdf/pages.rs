//! Page selection expressions ("1-5,7,10-12").

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Longest range one token may expand to, so "1-4000000000" cannot
/// allocate a huge set
const MAX_RANGE: u32 = 100_000;

/// A user-specified subset of PDF pages (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PageSelection {
    /// Every page of the document
    #[default]
    All,
    /// Explicit pages; may reference pages past the end of a given document
    Pages(BTreeSet<u32>),
}

impl PageSelection {
    /// Parse a selection expression without knowing the page count.
    ///
    /// Tokens are comma separated; each is a page number or an inclusive
    /// `a-b` range. Malformed tokens, zero, and reversed ranges are skipped.
    /// An expression with no usable token selects every page.
    pub fn parse(expr: &str) -> Self {
        let compact: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() || compact.eq_ignore_ascii_case("all") {
            return Self::All;
        }

        let mut pages = BTreeSet::new();
        for token in compact.split(',').filter(|t| !t.is_empty()) {
            match parse_token(token) {
                Some((start, end)) => pages.extend(start..=end),
                None => tracing::warn!("Ignoring invalid page token '{}'", token),
            }
        }

        if pages.is_empty() {
            Self::All
        } else {
            Self::Pages(pages)
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Concrete, strictly increasing page numbers within `[1, total]`.
    pub fn resolve(&self, total: u32) -> Vec<u32> {
        match self {
            Self::All => (1..=total).collect(),
            Self::Pages(pages) => pages.iter().copied().filter(|&p| p <= total).collect(),
        }
    }
}

fn parse_token(token: &str) -> Option<(u32, u32)> {
    let (start, end) = match token.split_once('-') {
        Some((a, b)) => (a.parse::<u32>().ok()?, b.parse::<u32>().ok()?),
        None => {
            let page = token.parse::<u32>().ok()?;
            (page, page)
        }
    };
    if start == 0 || start > end {
        return None;
    }
    let last = start.saturating_add(MAX_RANGE - 1);
    if end > last {
        tracing::warn!(
            "Page range '{}' is longer than {} pages; stopping at page {}",
            token,
            MAX_RANGE,
            last
        );
    }
    Some((start, end.min(last)))
}

/// Parse `expr` and resolve it against a document of `total` pages.
///
/// `parse_page_selection("1-3,5,10-12", 6) == [1, 2, 3, 5]`
pub fn parse_page_selection(expr: &str, total: u32) -> Vec<u32> {
    PageSelection::parse(expr).resolve(total)
}

impl std::fmt::Display for PageSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pages = match self {
            Self::All => return write!(f, "all"),
            Self::Pages(pages) => pages,
        };

        // Collapse consecutive runs back into ranges
        let mut parts = Vec::new();
        let mut iter = pages.iter().copied().peekable();
        while let Some(start) = iter.next() {
            let mut end = start;
            while end.checked_add(1).is_some_and(|next| iter.peek() == Some(&next)) {
                end += 1;
                iter.next();
            }
            if start == end {
                parts.push(start.to_string());
            } else {
                parts.push(format!("{}-{}", start, end));
            }
        }
        write!(f, "{}", parts.join(","))
    }
}

impl std::str::FromStr for PageSelection {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl Serialize for PageSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PageSelection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}
