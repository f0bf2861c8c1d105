//! User query clean-up: sanitising, normalising and splitting into keywords and phrases

use unicode_normalization::UnicodeNormalization;

const QUOTES: [char; 2] = ['"', '\''];

/// One stretch of the raw query, either inside a matched quote pair or not
struct Segment {
    text: String,
    quoted: bool,
}

/// Cut the query into quoted and unquoted segments.
///
/// A quote opens a phrase only when the same quote character appears again
/// later; the phrase ends at that first repeat. A quote without a partner is
/// left in the surrounding text.
fn quote_segments(query: &str) -> Vec<Segment> {
    let chars: Vec<char> = query.chars().collect();
    let mut segments = Vec::new();
    let mut plain = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if QUOTES.contains(&c) {
            if let Some(offset) = chars[i + 1..].iter().position(|&other| other == c) {
                if !plain.is_empty() {
                    segments.push(Segment {
                        text: std::mem::take(&mut plain),
                        quoted: false,
                    });
                }
                let end = i + 1 + offset;
                segments.push(Segment {
                    text: chars[i + 1..end].iter().collect(),
                    quoted: true,
                });
                i = end + 1;
                continue;
            }
        }
        plain.push(c);
        i += 1;
    }

    if !plain.is_empty() {
        segments.push(Segment {
            text: plain,
            quoted: false,
        });
    }
    segments
}

fn is_query_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '~' | '_') || c.is_whitespace()
}

/// Make a raw user query safe to hand to the search backend.
///
/// Accented characters are ASCII-folded, anything outside
/// `[a-zA-Z0-9-.~_\s]` is dropped and one level of quoted phrases is kept,
/// rewritten with single quotes. Never fails.
pub fn sanitize_search_query(query: Option<&str>) -> String {
    let Some(query) = query else {
        return String::new();
    };

    let mut output = String::with_capacity(query.len());
    for segment in quote_segments(query) {
        if segment.text.is_empty() {
            continue;
        }
        let cleaned: String = segment.text.nfkd().filter(|c| is_query_safe(*c)).collect();
        if segment.quoted {
            output.push('\'');
            output.push_str(&cleaned);
            output.push('\'');
        } else {
            output.push_str(&cleaned);
        }
    }
    output
}

/// Trim the query and collapse runs of whitespace to a single space
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_escaped(chars: &[char], index: usize) -> bool {
    index > 0 && chars[index - 1] == '\\'
}

fn unescape_quotes(part: &str) -> String {
    part.replace("\\\"", "\"").replace("\\'", "'")
}

/// Split a query into keywords and phrases.
///
/// Balanced quotes (single or double, ignoring backslash-escaped ones) form a
/// phrase; an unbalanced quote swallows the rest of the query; everything else
/// splits on whitespace.
pub fn split_query(query: &str) -> Vec<String> {
    let query = normalize_query(query);
    let chars: Vec<char> = query.chars().collect();
    let mut parts = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let (part, next) = if QUOTES.contains(&c) && !is_escaped(&chars, i) {
            let closing = (i + 1..chars.len()).find(|&j| chars[j] == c && !is_escaped(&chars, j));
            match closing {
                Some(end) => (chars[i + 1..end].iter().collect::<String>(), end + 1),
                None => (chars[i + 1..].iter().collect::<String>(), chars.len()),
            }
        } else {
            let end = (i..chars.len())
                .find(|&j| chars[j].is_whitespace())
                .unwrap_or(chars.len());
            (chars[i..end].iter().collect::<String>(), end)
        };

        if !part.is_empty() {
            parts.push(unescape_quotes(&part));
        }
        i = next;
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_folds_accented_chars() {
        assert_eq!(sanitize_search_query(Some("Gôod morninç øæå")), "Good morninc a");
        assert_eq!(
            sanitize_search_query(Some("Après la pluie, le beau temps")),
            "Apres la pluie le beau temps"
        );
        assert_eq!(sanitize_search_query(Some("Lăpușneanu")), "Lapusneanu");
        assert_eq!(sanitize_search_query(Some("Пожалуйста")), "");
        assert_eq!(sanitize_search_query(Some("Ç \u{0043}\u{0327}")), "C C");
    }

    #[test]
    fn test_sanitize_keeps_only_safe_chars() {
        assert_eq!(sanitize_search_query(None), "");
        assert_eq!(sanitize_search_query(Some("¯\\_(ツ)_/¯")), " __ ");
        assert_eq!(sanitize_search_query(Some("!/(^&*)\\+{[@]}")), "");
    }

    #[test]
    fn test_sanitize_preserves_phrases() {
        for query in [
            "query",
            "a basic query",
            "a 'more complex' query",
            "a 'very complex' query with 'multiple phrases'",
        ] {
            assert_eq!(sanitize_search_query(Some(query)), query);
        }

        assert_eq!(
            sanitize_search_query(Some("a 'very complex' query with '\"multiple nested\" phrases'")),
            "a 'very complex' query with 'multiple nested phrases'"
        );
    }

    #[test]
    fn test_sanitize_rationalises_quotes() {
        assert_eq!(
            sanitize_search_query(Some("another \"phrased\" query")),
            "another 'phrased' query"
        );
        assert_eq!(
            sanitize_search_query(Some("a \"misquoted query")),
            "a misquoted query"
        );
        assert_eq!(
            sanitize_search_query(Some("another misquoted' query")),
            "another misquoted query"
        );
        assert_eq!(
            sanitize_search_query(Some("a misquoted' query with 'a phrase'")),
            "a misquoted' query with 'a phrase"
        );
        assert_eq!(
            sanitize_search_query(Some("a misquoted 'query with' 'several' 'phrases")),
            "a misquoted 'query with' 'several' phrases"
        );
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query(" foo  \"bar   baz\"\t"), "foo \"bar baz\"");
    }

    #[test]
    fn test_split_query() {
        assert_eq!(split_query("hello"), vec!["hello"]);
        assert_eq!(split_query("hello world"), vec!["hello", "world"]);
        assert_eq!(split_query("hello \"big world\""), vec!["hello", "big world"]);
        assert_eq!(split_query("hello 'big world'"), vec!["hello", "big world"]);
        assert_eq!(
            split_query("hello \"big 'big world'\""),
            vec!["hello", "big 'big world'"]
        );
        assert_eq!(split_query("hello \"big world"), vec!["hello", "big world"]);
        assert_eq!(
            split_query(r"hello 'john\'s world'"),
            vec!["hello", "john's world"]
        );
        assert!(split_query("").is_empty());
    }
}
