//! JSON-object and SQL extraction from noisy LLM completions.
//!
//! Models routinely wrap structured output in code fences, prefix it with
//! commentary, or leave a trailing explanation after the payload. Every
//! agent that expects JSON or SQL back from [`super::LlmClient::generate`]
//! goes through these two helpers rather than parsing ad hoc (spec.md §6).

/// Pull the first JSON object out of a response, preferring a fenced
/// ` ```json ` block when present and otherwise scanning for the first
/// balanced `{...}` span.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(fenced) = extract_fenced(text, "json") {
        return Some(fenced);
    }
    if let Some(fenced) = extract_fenced(text, "") {
        let trimmed = fenced.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return Some(fenced);
        }
    }

    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        let c = b as char;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Pull a single SQL statement out of a response: strip a ` ```sql ` (or
/// bare ` ``` `) fence, drop leading commentary lines, strip a trailing
/// semicolon, and normalise whitespace. Returns `None` if nothing that
/// looks like SQL could be found (spec.md §4.3 `EMPTY_SQL`).
pub fn extract_sql(text: &str) -> Option<String> {
    let candidate = extract_fenced(text, "sql")
        .or_else(|| extract_fenced(text, ""))
        .unwrap_or(text);

    let sql = candidate
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with("--") && !trimmed.starts_with("//")
        })
        .collect::<Vec<_>>()
        .join("\n");

    let normalized = normalize_sql(&sql);
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Strip code-fence markers, trailing semicolons, and surrounding
/// whitespace from a SQL string. Exposed separately from [`extract_sql`]
/// so the decomposer can apply it uniformly regardless of how the SQL was
/// obtained (spec.md §4.3 "final_sql ... trailing semicolons normalised").
pub fn normalize_sql(sql: &str) -> String {
    let mut s = sql.trim().to_string();
    while s.ends_with(';') || s.ends_with(char::is_whitespace) {
        s.pop();
    }
    s.trim().to_string()
}

fn extract_fenced<'a>(text: &'a str, lang: &str) -> Option<&'a str> {
    let open = if lang.is_empty() { "```".to_string() } else { format!("```{lang}") };
    let start = text.find(&open)? + open.len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nDone.";
        assert_eq!(extract_json(text), Some("{\"a\": 1}"));
    }

    #[test]
    fn extracts_bare_json_object() {
        let text = "The result is {\"tables\": {\"x\": \"all\"}} as requested.";
        assert_eq!(extract_json(text), Some(r#"{"tables": {"x": "all"}}"#));
    }

    #[test]
    fn extracts_fenced_sql_and_strips_semicolon() {
        let text = "```sql\nSELECT * FROM users;\n```";
        assert_eq!(extract_sql(text), Some("SELECT * FROM users".to_string()));
    }

    #[test]
    fn extracts_bare_sql_dropping_comment_lines() {
        let text = "-- plan\nSELECT id FROM schools WHERE city = 'LA'";
        assert_eq!(extract_sql(text), Some("SELECT id FROM schools WHERE city = 'LA'".to_string()));
    }

    #[test]
    fn returns_none_for_empty_response() {
        assert_eq!(extract_sql(""), None);
        assert_eq!(extract_sql("-- just a comment"), None);
    }

    #[test]
    fn normalize_strips_repeated_trailing_semicolons() {
        assert_eq!(normalize_sql("SELECT 1;;  \n"), "SELECT 1");
    }
}
