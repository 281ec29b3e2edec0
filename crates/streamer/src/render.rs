/// Whether `text` contains at least one complete fenced code block.
pub fn has_fenced_code_block(text: &str) -> bool {
    text.matches("```").count() >= 2
}

/// Renders fenced code blocks as `<pre><code[ class="language-X"]>`, HTML
/// escaping both code and prose. Unterminated trailing fences are flushed
/// as code rather than dropped.
pub fn render_html(text: &str) -> String {
    let mut out = String::new();
    let mut in_fence = false;
    let mut fence_lang = String::new();
    let mut fence_body = String::new();

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("```") {
            if !in_fence {
                in_fence = true;
                fence_lang = rest.trim().to_string();
                fence_body.clear();
            } else {
                in_fence = false;
                flush_fence(&mut out, &fence_lang, &fence_body);
            }
            continue;
        }
        if in_fence {
            fence_body.push_str(line);
            fence_body.push('\n');
        } else {
            out.push_str(&escape_html(line));
            out.push('\n');
        }
    }
    if in_fence {
        flush_fence(&mut out, &fence_lang, &fence_body);
    }
    out.trim_end_matches('\n').to_string()
}

fn flush_fence(out: &mut String, lang: &str, body: &str) {
    if lang.is_empty() {
        out.push_str(&format!("<pre><code>{}</code></pre>\n", escape_html(body)));
    } else {
        out.push_str(&format!(
            "<pre><code class=\"language-{}\">{}</code></pre>\n",
            escape_html(lang),
            escape_html(body)
        ));
    }
}

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_a_complete_fence_pair() {
        assert!(has_fenced_code_block("before\n```rust\nfn x() {}\n```\nafter"));
        assert!(!has_fenced_code_block("no fences here"));
        assert!(!has_fenced_code_block("only one ``` fence"));
    }

    #[test]
    fn renders_language_tagged_block_with_escaping() {
        let html = render_html("see:\n```rust\nlet x = 1 < 2;\n```\ndone");
        assert!(html.contains("<pre><code class=\"language-rust\">"));
        assert!(html.contains("1 &lt; 2"));
        assert!(html.contains("done"));
    }

    #[test]
    fn renders_untagged_block_without_class() {
        let html = render_html("```\nplain\n```");
        assert!(html.contains("<pre><code>plain"));
        assert!(!html.contains("language-"));
    }

    #[test]
    fn unterminated_fence_is_still_flushed_as_code() {
        let html = render_html("```rust\nfn x() {}");
        assert!(html.contains("<pre><code"));
        assert!(html.contains("fn x"));
    }
}
