//! Route classification: which caching strategy applies to a path.
//!
//! Classification order is fixed: never-cache wins over cache-first,
//! which wins over network-first, which wins over blog content; anything
//! left falls through to the default strategy.

use regex::Regex;

/// Partition prefix shared by every cache this worker owns.
pub const CACHE_PREFIX: &str = "vitaltrail-";

/// Critical routes pre-populated into the static partition at install.
pub const STATIC_ROUTES: &[&str] = &[
    "/",
    "/journal/",
    "/writing/",
    "/projects/",
    "/links/",
    "/lists/",
    "/subscribe/",
    "/offline/",
    "/favicon.svg",
    "/_astro/globals.css",
];

/// The three named partitions of one cache version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Static,
    Dynamic,
    Blog,
}

impl Partition {
    pub const ALL: [Partition; 3] = [Partition::Static, Partition::Dynamic, Partition::Blog];

    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Static => "static",
            Partition::Dynamic => "dynamic",
            Partition::Blog => "blog",
        }
    }

    /// Versioned cache name, e.g. `vitaltrail-static-v1`.
    pub fn cache_name(&self, version: &str) -> String {
        format!("{}{}-{}", CACHE_PREFIX, self.as_str(), version)
    }
}

/// Strategy assigned to a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Bypass the cache entirely; the response is never persisted.
    NeverCache,
    /// Serve from the static partition, revalidating in the background.
    CacheFirst,
    /// Network first, dynamic partition as the fallback.
    NetworkFirst,
    /// Network first against the blog partition, with client notices.
    BlogContent,
    /// Network with the dynamic partition as fallback; only successful
    /// HTML responses are stored.
    Default,
}

pub struct StrategyTable {
    never_cache: Vec<Regex>,
    cache_first: Vec<Regex>,
    network_first: Vec<Regex>,
    blog: Vec<Regex>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("built-in route pattern"))
        .collect()
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self {
            never_cache: compile(&[
                r"/analytics/.+",
                r"/gtag/.+",
                r"googletagmanager\.com",
                r"googleapis\.com",
                r"gstatic\.com",
            ]),
            cache_first: compile(&[
                r"/_astro/.+\.(css|js|woff2?|png|jpg|jpeg|svg|gif|webp)$",
                r"/images/.+\.(png|jpg|jpeg|svg|gif|webp)$",
                r"/blog/images/.+\.(png|jpg|jpeg|svg|gif|webp)$",
                r"/favicon\.svg$",
            ]),
            network_first: compile(&[r"/api/.+", r"/rss\.xml$", r"/sitemap.*\.xml$"]),
            blog: compile(&[r"/journal/.+", r"/writing/.+", r"/projects/.+"]),
        }
    }
}

impl StrategyTable {
    /// Classify a request path.
    pub fn classify(&self, path: &str) -> Strategy {
        if self.never_cache.iter().any(|p| p.is_match(path)) {
            Strategy::NeverCache
        } else if self.cache_first.iter().any(|p| p.is_match(path)) {
            Strategy::CacheFirst
        } else if self.network_first.iter().any(|p| p.is_match(path)) {
            Strategy::NetworkFirst
        } else if self.blog.iter().any(|p| p.is_match(path)) {
            Strategy::BlogContent
        } else {
            Strategy::Default
        }
    }

    /// Which partition a strategy persists into, if any.
    pub fn partition_for(strategy: Strategy) -> Option<Partition> {
        match strategy {
            Strategy::NeverCache => None,
            Strategy::CacheFirst => Some(Partition::Static),
            Strategy::NetworkFirst | Strategy::Default => Some(Partition::Dynamic),
            Strategy::BlogContent => Some(Partition::Blog),
        }
    }
}
