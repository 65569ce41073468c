use reqwest::Url;

/// Opaque key for a single video, derived from its URL.
pub type VideoId = String;

const SHORT_HOST: &str = "youtu.be";
const SITE_HOST: &str = "youtube.com";
const WATCH_BASE: &str = "https://www.youtube.com/watch";

fn parse(url: &str) -> Option<Url> {
  Url::parse(url.trim()).ok()
}

/// `youtube.com` itself or any subdomain of it.
fn is_site_host(host: &str) -> bool {
  host == SITE_HOST || host.strip_suffix(SITE_HOST).is_some_and(|prefix| prefix.ends_with('.'))
}

fn query_param(url: &Url, name: &str) -> Option<String> {
  url.query_pairs().find(|(k, _)| k == name).map(|(_, v)| v.into_owned())
}

/// True when the URL points at a single YouTube video: a `youtu.be` short link,
/// a `/watch?v=` page, or a `/shorts/` page. Malformed URLs are never videos.
pub fn is_video_url(url: &str) -> bool {
  let Some(parsed) = parse(url) else { return false };
  let Some(host) = parsed.host_str() else { return false };

  if host == SHORT_HOST {
    return parsed.path().len() > 1;
  }
  if !is_site_host(host) {
    return false;
  }
  if parsed.path() == "/watch" {
    return query_param(&parsed, "v").is_some();
  }
  parsed.path().starts_with("/shorts/")
}

/// Extract the video id from a video URL, or `None` for anything else.
pub fn extract_video_id(url: &str) -> Option<VideoId> {
  let parsed = parse(url)?;
  let host = parsed.host_str()?;

  let id = if host == SHORT_HOST {
    parsed.path().trim_start_matches('/').split('/').next().map(str::to_string)
  } else if !is_site_host(host) {
    None
  } else if parsed.path() == "/watch" {
    query_param(&parsed, "v")
  } else {
    parsed.path().strip_prefix("/shorts/").and_then(|rest| rest.split('/').next()).map(str::to_string)
  };

  id.filter(|id| !id.is_empty())
}

/// Rewrite `youtu.be/<id>` into `https://www.youtube.com/watch?v=<id>`.
/// Other URLs come back re-serialized; unparseable input comes back verbatim.
pub fn normalize_video_url(url: &str) -> String {
  let Some(parsed) = parse(url) else { return url.to_string() };

  if parsed.host_str() == Some(SHORT_HOST)
    && let Some(id) = extract_video_id(url)
    && let Ok(mut watch) = Url::parse(WATCH_BASE)
  {
    watch.query_pairs_mut().append_pair("v", &id);
    return watch.to_string();
  }

  parsed.to_string()
}

/// Match a URL against a browser match pattern such as `*://*.youtube.com/*`.
///
/// Only the subset used for tab enumeration is supported: `*` or a literal
/// scheme, `*.` host wildcards, and a path that is either `/*` or a literal prefix
/// ending in `*`.
pub fn matches_pattern(url: &str, pattern: &str) -> bool {
  let Some(parsed) = parse(url) else { return false };
  let Some(host) = parsed.host_str() else { return false };
  let Some((scheme, rest)) = pattern.split_once("://") else { return false };
  let (host_pattern, path_pattern) = match rest.find('/') {
    Some(idx) => rest.split_at(idx),
    None => (rest, "/*"),
  };

  let scheme_ok = match scheme {
    "*" => matches!(parsed.scheme(), "http" | "https"),
    other => parsed.scheme() == other,
  };
  let host_ok = match host_pattern.strip_prefix("*.") {
    Some(base) => host == base || host.strip_suffix(base).is_some_and(|prefix| prefix.ends_with('.')),
    None => host_pattern == "*" || host == host_pattern,
  };
  let path_ok = match path_pattern.strip_suffix('*') {
    Some(prefix) => parsed.path().starts_with(prefix),
    None => parsed.path() == path_pattern,
  };

  scheme_ok && host_ok && path_ok
}

/// True when the URL matches any of the given match patterns.
pub fn matches_any_pattern<S: AsRef<str>>(url: &str, patterns: &[S]) -> bool {
  patterns.iter().any(|p| matches_pattern(url, p.as_ref()))
}
