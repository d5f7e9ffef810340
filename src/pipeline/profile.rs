use once_cell::sync::Lazy;
use url::Url;

use crate::dom::Selector;

/// Selectors locating content-bearing elements for one family of sites.
#[derive(Debug)]
pub struct PlatformProfile {
    pub name: &'static str,
    pub host_patterns: &'static [&'static str],
    pub content_css: &'static str,
    pub container_css: &'static str,
    pub content_selector: Selector,
    pub container_selector: Selector,
}

impl PlatformProfile {
    fn builtin(
        name: &'static str,
        host_patterns: &'static [&'static str],
        content: &'static str,
        container: &'static str,
    ) -> Self {
        Self {
            name,
            host_patterns,
            content_css: content,
            container_css: container,
            content_selector: Selector::parse(content).expect("valid builtin content selector"),
            container_selector: Selector::parse(container)
                .expect("valid builtin container selector"),
        }
    }

    pub fn is_generic(&self) -> bool {
        self.host_patterns.is_empty()
    }

    fn matches_host(&self, host: &str) -> bool {
        self.host_patterns.iter().any(|pattern| host.contains(pattern))
    }
}

static PROFILES: Lazy<Vec<PlatformProfile>> = Lazy::new(|| {
    vec![
        PlatformProfile::builtin(
            "twitter",
            &["twitter.com", "x.com"],
            r#"[data-testid="tweetText"]"#,
            "article",
        ),
        PlatformProfile::builtin(
            "reddit",
            &["reddit.com"],
            r#"div[data-testid="comment"] p, .RichTextJSON-root p, .md p"#,
            r#"div[data-testid="comment"]"#,
        ),
        PlatformProfile::builtin(
            "youtube",
            &["youtube.com"],
            "#content-text",
            "ytd-comment-thread-renderer",
        ),
        PlatformProfile::builtin("instagram", &["instagram.com"], "._a9zs", "ul._a9ym"),
    ]
});

static GENERIC: Lazy<PlatformProfile> = Lazy::new(|| {
    PlatformProfile::builtin(
        "generic",
        &[],
        r#"[data-testid="tweetText"], #content-text, div[data-testid="comment"] p"#,
        "body",
    )
});

/// Picks the first profile whose host pattern occurs in the origin's host,
/// falling back to the generic profile.
pub fn resolve(origin: &str) -> &'static PlatformProfile {
    let profile = host_of(origin)
        .and_then(|host| PROFILES.iter().find(|profile| profile.matches_host(&host)))
        .unwrap_or_else(|| &*GENERIC);
    tracing::info!(
        target: "profile",
        origin,
        profile = profile.name,
        content = profile.content_css,
        "platform profile resolved"
    );
    profile
}

fn host_of(origin: &str) -> Option<String> {
    let parsed = Url::parse(origin)
        .ok()
        .filter(|url| url.host_str().is_some())
        .or_else(|| Url::parse(&format!("https://{origin}")).ok())?;
    parsed.host_str().map(str::to_ascii_lowercase)
}
