//! Host and path-prefix routing.
//!
//! Routes are sorted once at startup: longest path prefix first, ties kept in
//! config order (ascending route id). Matching scans the sorted list and
//! takes the first route whose host is empty or equal to the request host
//! (lowercased, port stripped) and whose prefix prefixes the path, so the
//! longest matching prefix always wins deterministically.

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct Route {
    pub id: String,
    pub host: String,
    pub path_prefix: String,
    pub upstream: String,
    pub policy: String,
}

#[derive(Debug)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new(config: &Config) -> Self {
        let mut routes: Vec<Route> = config
            .routes
            .iter()
            .enumerate()
            .map(|(i, route)| Route {
                id: format!("route-{i}"),
                host: route.matcher.host.trim().to_lowercase(),
                path_prefix: route.matcher.path_prefix.clone(),
                upstream: route.upstream.clone(),
                policy: route.policy.clone(),
            })
            .collect();

        // Stable sort keeps config order (ascending id) for equal lengths.
        routes.sort_by(|a, b| b.path_prefix.len().cmp(&a.path_prefix.len()));

        Self { routes }
    }

    pub fn matches(&self, host: &str, path: &str) -> Option<&Route> {
        let host = strip_port(host).to_lowercase();
        self.routes.iter().find(|route| {
            (route.host.is_empty() || route.host == host) && path.starts_with(&route.path_prefix)
        })
    }
}

fn strip_port(hostport: &str) -> &str {
    if let Some(rest) = hostport.strip_prefix('[') {
        // Bracketed IPv6: [::1]:8080
        return rest.split(']').next().unwrap_or(hostport);
    }
    match hostport.rfind(':') {
        // Bare IPv6 has multiple colons and no port.
        Some(idx) if hostport[..idx].contains(':') => hostport,
        Some(idx) => &hostport[..idx],
        None => hostport,
    }
}
