use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDefinition {
    pub method: HttpMethod,
    pub path: &'static str,
}

impl fmt::Display for RouteDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method.as_str(), self.path)
    }
}

pub fn route_catalog() -> Vec<RouteDefinition> {
    catalog_from(SERVICE_ROUTES)
}

/// First occurrence wins; later duplicates of a method and path are dropped.
fn catalog_from(routes: &[(HttpMethod, &'static str)]) -> Vec<RouteDefinition> {
    let mut seen = BTreeSet::new();
    routes
        .iter()
        .filter(|(method, path)| seen.insert((*method, *path)))
        .map(|&(method, path)| RouteDefinition { method, path })
        .collect()
}

const SERVICE_ROUTES: &[(HttpMethod, &str)] = &[
    (HttpMethod::Get, "/health"),
    (HttpMethod::Get, "/models"),
    (HttpMethod::Post, "/inpaint"),
    (HttpMethod::Post, "/inpaint/upload"),
];
