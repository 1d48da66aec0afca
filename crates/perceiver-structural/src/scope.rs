use serde::{Deserialize, Serialize};
use url::Url;

/// Domain plus a normalized path prefix. Query strings, fragments and job
/// identifiers are dropped so the same form step hashes identically across
/// reloads.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PageScope {
    pub domain: String,
    pub normalized_path: String,
}

impl PageScope {
    pub fn key(&self) -> String {
        format!("{}{}", self.domain, self.normalized_path)
    }
}

const MAX_PATH_SEGMENTS: usize = 3;

pub fn stable_page_scope(raw_url: &str) -> PageScope {
    let Ok(parsed) = Url::parse(raw_url.trim()) else {
        return PageScope {
            domain: String::new(),
            normalized_path: "/".to_string(),
        };
    };
    let domain = parsed
        .host_str()
        .map(|host| host.trim_start_matches("www.").to_lowercase())
        .unwrap_or_default();

    let segments: Vec<String> = parsed
        .path_segments()
        .map(|parts| {
            parts
                .map(str::to_lowercase)
                .filter(|part| !part.is_empty())
                .filter(|part| part != "jobs" && part != "job")
                .filter(|part| !is_volatile_segment(part))
                .take(MAX_PATH_SEGMENTS)
                .collect()
        })
        .unwrap_or_default();

    let normalized_path = if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    };
    PageScope {
        domain,
        normalized_path,
    }
}

/// Numeric ids and long hex/uuid tokens vary per posting.
fn is_volatile_segment(segment: &str) -> bool {
    if segment.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    let hexish = segment
        .chars()
        .filter(|c| c.is_ascii_hexdigit() || *c == '-')
        .count();
    segment.len() >= 16 && hexish == segment.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_query_and_job_segments() {
        let scope = stable_page_scope("https://WWW.Example.com/Jobs/123/Apply?utm=x#top");
        assert_eq!(scope.domain, "example.com");
        assert_eq!(scope.normalized_path, "/apply");
    }

    #[test]
    fn keeps_at_most_three_segments() {
        let scope = stable_page_scope("https://boards.acme.io/careers/eng/backend/step-2/review");
        assert_eq!(scope.normalized_path, "/careers/eng/backend");
    }

    #[test]
    fn invalid_url_falls_back_to_root() {
        let scope = stable_page_scope("not a url");
        assert_eq!(scope.domain, "");
        assert_eq!(scope.normalized_path, "/");
    }

    #[test]
    fn uuid_segments_are_volatile() {
        let scope = stable_page_scope(
            "https://ats.example.com/apply/3f2a9c4e-1b2d-4e5f-8a9b-0c1d2e3f4a5b/form",
        );
        assert_eq!(scope.normalized_path, "/apply/form");
    }
}
