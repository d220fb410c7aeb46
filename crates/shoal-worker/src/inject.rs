use std::collections::BTreeMap;

/// Env var prefixes whose values are exposed to HTML documents, unless
/// overridden by `SHOAL_ENV_PREFIXES` (comma-separated).
pub const DEFAULT_ENV_PREFIXES: &[&str] = &["PUBLIC_", "VITE_"];
pub const ENV_PREFIXES_VAR: &str = "SHOAL_ENV_PREFIXES";

/// What gets spliced into an HTML document before it leaves the worker.
pub struct Injection<'a> {
    /// Value of the `x-base` request header, if any.
    pub base_href: Option<&'a str>,
    /// Prefix-filtered environment, already collected.
    pub env: BTreeMap<String, String>,
}

/// Collect the process environment entries matching the configured prefixes.
pub fn client_env(prefixes: &[String]) -> BTreeMap<String, String> {
    std::env::vars()
        .filter(|(name, _)| prefixes.iter().any(|p| name.starts_with(p.as_str())))
        .collect()
}

/// Resolve the active prefix list.
pub fn env_prefixes() -> Vec<String> {
    match std::env::var(ENV_PREFIXES_VAR) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => DEFAULT_ENV_PREFIXES.iter().map(|p| p.to_string()).collect(),
    }
}

/// Splice `<base href>` and a `window.__env__` script into the head of an
/// HTML document. Non-UTF-8 bodies pass through untouched.
pub fn inject_html(body: Vec<u8>, injection: &Injection<'_>) -> Vec<u8> {
    if injection.base_href.is_none() && injection.env.is_empty() {
        return body;
    }
    let Ok(html) = std::str::from_utf8(&body) else {
        return body;
    };

    let mut snippet = String::new();
    if let Some(href) = injection.base_href {
        snippet.push_str(&format!("<base href=\"{}\">", escape_attr(href)));
    }
    if !injection.env.is_empty() {
        // A `</script>` inside a value would end the script element early;
        // rewrite the close tag inside the JSON text.
        let json = serde_json::to_string(&injection.env)
            .unwrap_or_else(|_| "{}".to_string())
            .replace("</script>", "<\\/script>");
        snippet.push_str(&format!("<script>window.__env__={json};</script>"));
    }

    let insert_at = head_insertion_point(html).unwrap_or(0);
    let mut out = String::with_capacity(html.len() + snippet.len());
    out.push_str(&html[..insert_at]);
    out.push_str(&snippet);
    out.push_str(&html[insert_at..]);
    out.into_bytes()
}

/// Byte offset just past the opening `<head...>` tag, case-insensitive.
fn head_insertion_point(html: &str) -> Option<usize> {
    let lower = html.to_ascii_lowercase();
    let start = lower.find("<head")?;
    let close = lower[start..].find('>')?;
    Some(start + close + 1)
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn base_href_lands_inside_head() {
        let html = b"<html><head><title>t</title></head><body></body></html>".to_vec();
        let out = inject_html(
            html,
            &Injection {
                base_href: Some("/app/"),
                env: BTreeMap::new(),
            },
        );
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("<head><base href=\"/app/\"><title>"));
    }

    #[test]
    fn base_href_is_attribute_escaped() {
        let html = b"<html><head></head></html>".to_vec();
        let out = inject_html(
            html,
            &Injection {
                base_href: Some("/x\"><script>alert(1)</script>"),
                env: BTreeMap::new(),
            },
        );
        let out = String::from_utf8(out).unwrap();
        assert!(!out.contains("\"><script>alert(1)"));
        assert!(out.contains("&quot;&gt;&lt;script&gt;"));
    }

    #[test]
    fn env_script_rewrites_script_close() {
        let html = b"<html><head></head></html>".to_vec();
        let out = inject_html(
            html,
            &Injection {
                base_href: None,
                env: env(&[("PUBLIC_X", "a</script><b>")]),
            },
        );
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("window.__env__="));
        assert!(!out.contains("a</script><b>"));
    }

    #[test]
    fn document_without_head_gets_prefix_insertion() {
        let html = b"<p>bare</p>".to_vec();
        let out = inject_html(
            html,
            &Injection {
                base_href: Some("/b/"),
                env: BTreeMap::new(),
            },
        );
        assert!(String::from_utf8(out).unwrap().starts_with("<base href=\"/b/\">"));
    }

    #[test]
    fn nothing_to_inject_passes_through() {
        let html = b"<html><head></head></html>".to_vec();
        let out = inject_html(
            html.clone(),
            &Injection {
                base_href: None,
                env: BTreeMap::new(),
            },
        );
        assert_eq!(out, html);
    }
}
