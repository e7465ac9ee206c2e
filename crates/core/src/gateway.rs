//! Forwarding-config parsing for the gateway tier.
//!
//! The gateway's own introspection would only reveal its ingress, so its route
//! set is read from the reverse-proxy configuration instead. The parser
//! understands the nginx subset used by compose deployments:
//! `upstream <name> { server <host>[:port]; }` blocks and
//! `location [=|^~] <path> { proxy_pass http://<upstream>[/...]; }` blocks.
//! Regex locations are ignored because they cannot be probed literally.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One forwarding rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayRoute {
    /// Public path prefix, probed as-is against the gateway.
    pub path: String,
    /// Upstream host as written after `proxy_pass` (port stripped).
    pub upstream: String,
}

impl GatewayRoute {
    /// Map the upstream onto a declared service name, if any matches.
    pub fn backend<'a>(&self, services: &'a [String]) -> Option<&'a String> {
        services.iter().find(|s| s.as_str() == self.upstream)
    }
}

pub fn parse_forwarding_config(text: &str) -> Vec<GatewayRoute> {
    let mut upstreams: BTreeMap<String, String> = BTreeMap::new();
    let mut raw_routes: Vec<(String, String)> = Vec::new();

    let mut current_upstream: Option<String> = None;
    let mut current_location: Option<String> = None;

    for line in text.lines() {
        let line = strip_comment(line).trim();
        if line.is_empty() {
            continue;
        }
        let tokens: Vec<&str> = line
            .split_whitespace()
            .map(|t| t.trim_end_matches(';'))
            .filter(|t| !t.is_empty())
            .collect();

        // Directives may share a line with the block that opens them.
        if tokens.first() == Some(&"upstream") {
            current_upstream = tokens.get(1).map(|s| s.trim_end_matches('{').to_string());
        }
        if let Some(name) = current_upstream.as_ref() {
            let server = tokens
                .iter()
                .position(|t| *t == "server")
                .and_then(|idx| tokens.get(idx + 1))
                .filter(|t| **t != "{");
            if let Some(server) = server {
                upstreams
                    .entry(name.clone())
                    .or_insert_with(|| host_of(server));
            }
        }
        if let Some(idx) = tokens.iter().position(|t| *t == "location") {
            current_location = location_path(&tokens[idx + 1..]);
        }
        if let Some(idx) = tokens.iter().position(|t| *t == "proxy_pass") {
            if let (Some(path), Some(target)) = (current_location.take(), tokens.get(idx + 1)) {
                raw_routes.push((path, host_of(target)));
            }
        }

        if line.ends_with('}') {
            current_upstream = None;
        }
    }

    raw_routes
        .into_iter()
        .map(|(path, host)| {
            let upstream = upstreams.get(&host).cloned().unwrap_or(host);
            GatewayRoute { path, upstream }
        })
        .collect()
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn location_path(args: &[&str]) -> Option<String> {
    let args: Vec<&str> = args.iter().copied().filter(|a| *a != "{").collect();
    match args.as_slice() {
        [modifier, path, ..] if *modifier == "=" || *modifier == "^~" => {
            Some(path.trim_end_matches('{').to_string())
        }
        [modifier, ..] if modifier.starts_with('~') => None,
        [path, ..] if path.starts_with('/') => Some(path.trim_end_matches('{').to_string()),
        _ => None,
    }
}

/// `http://portal:3001/api/` -> `portal`
fn host_of(target: &str) -> String {
    let rest = target
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(target);
    let host_port = rest.split('/').next().unwrap_or(rest);
    host_port
        .split(':')
        .next()
        .unwrap_or(host_port)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONF: &str = r#"
events {}
http {
    upstream portal_backend {
        server portal:3001;
    }

    server {
        listen 80;

        location / {
            proxy_pass http://portal_backend;
        }

        # review workspace
        location /review/ {
            proxy_pass http://review:8081/;
            proxy_set_header Host $host;
        }

        location = /logs {
            proxy_pass http://logs:8082;
        }

        location ~ ^/static/ {
            proxy_pass http://portal:3001;
        }

        location /analytics/ { proxy_pass http://analytics:8083/; }
    }
}
"#;

    #[test]
    fn parses_locations_and_upstreams() {
        let routes = parse_forwarding_config(CONF);
        assert_eq!(
            routes,
            vec![
                GatewayRoute {
                    path: "/".into(),
                    upstream: "portal".into()
                },
                GatewayRoute {
                    path: "/review/".into(),
                    upstream: "review".into()
                },
                GatewayRoute {
                    path: "/logs".into(),
                    upstream: "logs".into()
                },
                GatewayRoute {
                    path: "/analytics/".into(),
                    upstream: "analytics".into()
                },
            ]
        );
    }

    #[test]
    fn backend_matches_declared_services_only() {
        let route = GatewayRoute {
            path: "/x".into(),
            upstream: "review".into(),
        };
        let services = vec!["portal".to_string(), "review".to_string()];
        assert_eq!(route.backend(&services).map(String::as_str), Some("review"));
        assert!(route.backend(&services[..1]).is_none());
    }

    #[test]
    fn single_line_upstreams_close_their_block() {
        let conf = "upstream web { server portal:3001; }\n\
                    server {\n\
                    location /app { proxy_pass http://web; }\n\
                    }\n";
        assert_eq!(
            parse_forwarding_config(conf),
            vec![GatewayRoute {
                path: "/app".into(),
                upstream: "portal".into()
            }]
        );
    }
}
