//! Whole-token link rewriting for exported documents.
//!
//! The document is scanned once, left to right. At every token boundary the longest staged
//! source URL that starts there and ends at another boundary is replaced, so `/a.png` never
//! matches inside `/a.png.bak`, URLs containing spaces or parentheses still match as a
//! whole, and replacement output is never scanned again.

use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    pub text: String,
    pub replacements: usize,
}

/// Replace every whole-token occurrence of each `(from, to)` pair.
///
/// When the same `from` appears more than once, the first pair wins.
pub fn rewrite_links(text: &str, pairs: &[(&str, &str)]) -> Rewritten {
    let mut seen = HashSet::with_capacity(pairs.len());
    let mut candidates: Vec<(&str, &str)> = pairs
        .iter()
        .filter(|(from, _)| !from.is_empty() && seen.insert(*from))
        .copied()
        .collect();

    if candidates.is_empty() {
        return Rewritten {
            text: text.to_string(),
            replacements: 0,
        };
    }
    candidates.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));

    let mut output = String::with_capacity(text.len());
    let mut replacements = 0;
    let mut index = 0;
    let mut at_boundary = true;

    while index < text.len() {
        let rest = &text[index..];
        if at_boundary {
            if let Some((from, to)) = candidates
                .iter()
                .find(|(from, _)| rest.starts_with(from) && ends_at_boundary(&rest[from.len()..]))
            {
                output.push_str(to);
                replacements += 1;
                index += from.len();
                at_boundary = from.chars().next_back().is_some_and(is_delimiter);
                continue;
            }
        }

        let Some(ch) = rest.chars().next() else {
            break;
        };
        output.push(ch);
        index += ch.len_utf8();
        at_boundary = is_delimiter(ch);
    }

    Rewritten {
        text: output,
        replacements,
    }
}

fn ends_at_boundary(after: &str) -> bool {
    after.chars().next().is_none_or(is_delimiter)
}

// Characters that bound a URL in markdown links, HTML attributes, and YAML front matter.
fn is_delimiter(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '(' | ')' | '[' | ']' | '<' | '>' | '"' | '\'' | '=')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_markdown_image_links() {
        let out = rewrite_links(
            "![a](/uploads/u1/img.png)",
            &[("/uploads/u1/img.png", "/assets/img.png")],
        );
        assert_eq!(out.text, "![a](/assets/img.png)");
        assert_eq!(out.replacements, 1);
    }

    #[test]
    fn rewrites_html_attributes_and_titles() {
        let text = concat!(
            "<img src=\"/uploads/1/a.png\" alt=\"a\">\n",
            "![b](/uploads/1/a.png \"title\")\n",
            "image: /uploads/1/a.png\n",
        );
        let out = rewrite_links(text, &[("/uploads/1/a.png", "/image/a.png")]);
        assert_eq!(
            out.text,
            concat!(
                "<img src=\"/image/a.png\" alt=\"a\">\n",
                "![b](/image/a.png \"title\")\n",
                "image: /image/a.png\n",
            )
        );
        assert_eq!(out.replacements, 3);
    }

    #[test]
    fn prefix_urls_do_not_bleed_into_longer_ones() {
        let text = "![x](/u/a.png) ![y](/u/a.png.png)";
        let out = rewrite_links(
            text,
            &[("/u/a.png", "/img/first.png"), ("/u/a.png.png", "/img/second.png")],
        );
        assert_eq!(out.text, "![x](/img/first.png) ![y](/img/second.png)");
    }

    #[test]
    fn replacements_are_not_rescanned() {
        let out = rewrite_links("(/a) (/b)", &[("/a", "/b"), ("/b", "/c")]);
        assert_eq!(out.text, "(/b) (/c)");
        assert_eq!(out.replacements, 2);
    }

    #[test]
    fn first_pair_wins_for_repeated_sources() {
        let out = rewrite_links("(/a)", &[("/a", "/first"), ("/a", "/second")]);
        assert_eq!(out.text, "(/first)");
    }

    #[test]
    fn text_without_matches_passes_through() {
        let text = "plain text with (parens) and \"quotes\" and ünïcode";
        let out = rewrite_links(text, &[("/missing.png", "/image/missing.png")]);
        assert_eq!(out.text, text);
        assert_eq!(out.replacements, 0);
    }

    #[test]
    fn urls_containing_delimiters_match_as_a_whole() {
        let text = "![a](</uploads/1/my pic.png>) <img src=\"/uploads/1/a (1).png\">";
        let out = rewrite_links(
            text,
            &[
                ("/uploads/1/my pic.png", "/image/pic.png"),
                ("/uploads/1/a (1).png", "/image/a1.png"),
            ],
        );
        assert_eq!(
            out.text,
            "![a](</image/pic.png>) <img src=\"/image/a1.png\">"
        );
        assert_eq!(out.replacements, 2);
    }

    #[test]
    fn matches_need_a_boundary_on_both_sides() {
        let text = "x/u/a.png /u/a.pngx (/u/a.png)";
        let out = rewrite_links(text, &[("/u/a.png", "/img/a.png")]);
        assert_eq!(out.text, "x/u/a.png /u/a.pngx (/img/a.png)");
        assert_eq!(out.replacements, 1);
    }
}
