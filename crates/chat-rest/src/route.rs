//! Routes and bucket keys
//!
//! Calls that share the server's rate-limit scope collapse onto one bucket key.
//! The key keeps the method and replaces every id with its role, so
//! `/channels/1/messages` and `/channels/9/messages` share one bucket.

use reqwest::Method;
use std::fmt;

/// Role placeholder for the id that follows a top-level resource
fn resource_role(resource: &str) -> Option<&'static str> {
    match resource {
        "channels" => Some(":channel_id"),
        "guilds" => Some(":guild_id"),
        "webhooks" => Some(":webhook_id"),
        _ => None,
    }
}

/// Method and path of one API call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    pub method: Method,
    pub path: String,
}

impl Route {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }

    /// Bucket key, e.g. `GET /channels/:channel_id/messages/:id`
    #[must_use]
    pub fn bucket_key(&self) -> String {
        format!("{} {}", self.method, bucket_path(&self.path))
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

fn is_id(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Path with every parameter replaced by its role
fn bucket_path(path: &str) -> String {
    let path = path.split('?').next().unwrap_or_default();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let root = segments.first().copied().unwrap_or_default();

    let mut out: Vec<&str> = Vec::with_capacity(segments.len());
    for (index, segment) in segments.iter().copied().enumerate() {
        let previous = index.checked_sub(1).map(|i| segments[i]);

        if previous == Some("reactions") {
            // Every reaction endpoint of a message shares one scope
            out.push("*");
            break;
        }

        let mapped = match (index, root) {
            (1, resource) if is_id(segment) => resource_role(resource).unwrap_or(":id"),
            (2, "webhooks") if is_id(segments[1]) => ":token",
            (1, "interactions") => ":id",
            (2, "interactions") => ":token",
            _ if is_id(segment) => ":id",
            _ => segment,
        };
        out.push(mapped);
    }

    format!("/{}", out.join("/"))
}
