//! Duration signals: ISO-8601 strings, raw watch-page markup, content replies.

const LENGTH_SECONDS_KEY: &str = "\"lengthSeconds\":\"";
const APPROX_DURATION_KEY: &str = "\"approxDurationMs\":\"";
const META_ITEMPROP: &str = "itemprop=\"duration\"";
const META_CONTENT: &str = "content=\"";

/// Parse the `PT[nH][nM][nS]` subset of ISO-8601 durations into seconds.
///
/// Components are optional integers and must appear in H, M, S order.
/// A bare `PT` yields `Some(0)`; callers only accept positive values.
pub fn parse_iso_duration(text: &str) -> Option<u64> {
  let mut rest = text.strip_prefix("PT")?;
  let mut total: u64 = 0;

  for (unit, factor) in [('H', 3600u64), ('M', 60), ('S', 1)] {
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 || !rest[digits..].starts_with(unit) {
      continue;
    }
    let value: u64 = rest[..digits].parse().ok()?;
    total = total.checked_add(value.checked_mul(factor)?)?;
    rest = &rest[digits + 1..];
  }

  rest.is_empty().then_some(total)
}

/// First `"<key>":"<digits>"` occurrence in the markup.
fn quoted_number(html: &str, key: &str) -> Option<u64> {
  html.match_indices(key).find_map(|(idx, _)| {
    let tail = &html[idx + key.len()..];
    let digits = tail.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 || !tail[digits..].starts_with('"') {
      return None;
    }
    tail[..digits].parse().ok()
  })
}

/// Content of the first `itemprop="duration" content="..."` pair. Attribute
/// names match case-insensitively; the value keeps its original case.
fn meta_duration(html: &str) -> Option<&str> {
  // ASCII lowercasing keeps byte offsets aligned with `html`.
  let lower = html.to_ascii_lowercase();

  lower.match_indices(META_ITEMPROP).find_map(|(idx, _)| {
    let after = idx + META_ITEMPROP.len();
    let gap: usize = lower[after..].chars().take_while(|c| c.is_whitespace()).map(char::len_utf8).sum();
    if gap == 0 || !lower[after + gap..].starts_with(META_CONTENT) {
      return None;
    }
    let start = after + gap + META_CONTENT.len();
    let len = html[start..].find('"')?;
    (len > 0).then(|| &html[start..start + len])
  })
}

/// Extract a duration from a watch page's raw markup.
///
/// Signals in priority order: the player's exact `lengthSeconds`, the
/// `approxDurationMs` field floored to seconds, then the `itemprop="duration"`
/// meta tag. The first strictly positive value wins.
pub fn extract_duration_from_html(html: &str) -> Option<u64> {
  if let Some(seconds) = quoted_number(html, LENGTH_SECONDS_KEY).filter(|s| *s > 0) {
    return Some(seconds);
  }

  if let Some(seconds) = quoted_number(html, APPROX_DURATION_KEY).map(|ms| ms / 1000).filter(|s| *s > 0) {
    return Some(seconds);
  }

  meta_duration(html).and_then(parse_iso_duration).filter(|s| *s > 0)
}

/// Convert a content-script reply into whole seconds, rejecting NaN, infinities
/// and anything that floors to zero or below.
pub fn seconds_from_reply(value: f64) -> Option<u64> {
  if !value.is_finite() || value <= 0.0 || value >= u64::MAX as f64 {
    return None;
  }
  let seconds = value.floor() as u64;
  (seconds > 0).then_some(seconds)
}

/// Render seconds as `H:MM:SS`, or `M:SS` under an hour.
pub fn format_clock(total_seconds: u64) -> String {
  let hours = total_seconds / 3600;
  let minutes = (total_seconds % 3600) / 60;
  let seconds = total_seconds % 60;

  if hours > 0 { format!("{}:{:02}:{:02}", hours, minutes, seconds) } else { format!("{}:{:02}", minutes, seconds) }
}
