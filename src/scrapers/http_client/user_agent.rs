//! User agent selection.

/// Identifying user agent, used when the site tolerates bots.
pub const USER_AGENT: &str = "nyaa-comments/0.4 (+comment watcher)";

/// Browser user agent sent by default; the index sites serve reduced pages to
/// unknown clients.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Browser agent unless told otherwise. `"identify"` picks [`USER_AGENT`];
/// any other value is sent as given.
pub fn resolve_user_agent(config: Option<&str>) -> String {
    match config {
        None => BROWSER_USER_AGENT.to_string(),
        Some("identify") => USER_AGENT.to_string(),
        Some(custom) => custom.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_agent_when_unset() {
        assert_eq!(resolve_user_agent(None), BROWSER_USER_AGENT);
    }

    #[test]
    fn test_identify_keyword_and_passthrough() {
        assert_eq!(resolve_user_agent(Some("identify")), USER_AGENT);
        assert_eq!(resolve_user_agent(Some("Identify")), "Identify");
        assert_eq!(resolve_user_agent(Some("watcher/2 (+ops@example.org)")), "watcher/2 (+ops@example.org)");
    }
}
