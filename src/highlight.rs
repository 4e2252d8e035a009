//! Query-time excerpts.
//!
//! Excerpts are cut from the plain text kept in the content store, not from
//! anything the engine stored. Matching tokens are wrapped in
//! `<strong class="match termN">` where `N` is the index of the query term;
//! the surrounding text is HTML-escaped.
//!
//! Words are split and compared the way the FTS5 `unicode61` tokenizer does:
//! letters, digits and marks form tokens, everything else (`_` included)
//! separates them, and comparison ignores case and diacritics.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Separator placed between two fragments of one excerpt.
pub const FRAGMENT_SEPARATOR: &str = " <span class=\"elipsis\">…</span> ";

/// Fragments kept per excerpt.
const TOP_FRAGMENTS: usize = 3;

/// How an excerpt is cut around the matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fragmenter {
    /// A window of `surround` characters around each run of matches.
    #[default]
    Context,
    /// Whole sentences containing a match.
    Sentence,
}

impl std::str::FromStr for Fragmenter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "context" => Ok(Fragmenter::Context),
            "sentence" => Ok(Fragmenter::Sentence),
            other => Err(format!(
                "unknown fragmenter '{}', use context or sentence",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExcerptOptions {
    pub fragmenter: Fragmenter,
    /// Upper bound for the length of one fragment.
    pub max_chars: usize,
    /// Context kept before and after a match.
    pub surround: usize,
}

impl Default for ExcerptOptions {
    fn default() -> Self {
        Self {
            fragmenter: Fragmenter::Context,
            max_chars: 300,
            surround: 20,
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    start: usize,
    end: usize,
    /// Index of the query term this token matches.
    term: Option<usize>,
}

#[derive(Debug, Clone)]
struct Fragment {
    /// First and last token (inclusive).
    first: usize,
    last: usize,
    matches: usize,
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{L}\p{N}\p{M}\p{Co}]+").expect("static regex"))
}

/// Lowercases `word` and strips its diacritics.
pub fn fold(word: &str) -> String {
    word.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Folded word tokens of a free-text query, deduplicated in order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for m in word_re().find_iter(query) {
        let term = fold(m.as_str());
        if !term.is_empty() && !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Builds an excerpt of `text` highlighting `terms`. Returns `None` when
/// no term occurs in the text.
pub fn highlight(text: &str, terms: &[String], options: &ExcerptOptions) -> Option<String> {
    let tokens: Vec<Token> = word_re()
        .find_iter(text)
        .map(|m| {
            let word = fold(m.as_str());
            Token {
                start: m.start(),
                end: m.end(),
                term: terms.iter().position(|t| *t == word),
            }
        })
        .collect();

    let mut fragments = match options.fragmenter {
        Fragmenter::Context => context_fragments(&tokens, options),
        Fragmenter::Sentence => sentence_fragments(text, &tokens, options),
    };
    if fragments.is_empty() {
        return None;
    }

    // Best fragments first, then back into text order.
    fragments.sort_by(|a, b| b.matches.cmp(&a.matches).then(a.first.cmp(&b.first)));
    fragments.truncate(TOP_FRAGMENTS);
    fragments.sort_by_key(|f| f.first);

    let rendered: Vec<String> = fragments
        .iter()
        .map(|f| format_fragment(text, &tokens, f))
        .collect();
    Some(rendered.join(FRAGMENT_SEPARATOR))
}

fn context_fragments(tokens: &[Token], options: &ExcerptOptions) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    let mut floor = 0;
    let mut i = 0;

    while i < tokens.len() {
        if tokens[i].term.is_none() {
            i += 1;
            continue;
        }

        let lo = tokens[i].start.saturating_sub(options.surround);
        let mut first = i;
        while first > floor && tokens[first - 1].start >= lo {
            first -= 1;
        }

        let mut last = i;
        let mut last_match_end = tokens[i].end;
        let mut matches = 1;
        let mut next = i + 1;
        while next < tokens.len() {
            let token = &tokens[next];
            if token.end - tokens[first].start > options.max_chars {
                break;
            }
            if token.term.is_some() {
                matches += 1;
                last_match_end = token.end;
            } else if token.end > last_match_end + options.surround {
                break;
            }
            last = next;
            next += 1;
        }

        fragments.push(Fragment {
            first,
            last,
            matches,
        });
        floor = last + 1;
        i = next;
    }

    fragments
}

fn sentence_fragments(text: &str, tokens: &[Token], options: &ExcerptOptions) -> Vec<Fragment> {
    static END: OnceLock<Regex> = OnceLock::new();
    let end_re = END.get_or_init(|| Regex::new(r"[.!?]+(\s+|$)").expect("static regex"));

    let mut bounds = Vec::new();
    let mut start = 0;
    for m in end_re.find_iter(text) {
        bounds.push((start, m.start()));
        start = m.end();
    }
    if start < text.len() {
        bounds.push((start, text.len()));
    }

    // Bounds and tokens are both in text order; walk them together.
    let mut fragments = Vec::new();
    let mut next = 0;
    for (s, e) in bounds {
        while next < tokens.len() && tokens[next].start < s {
            next += 1;
        }
        let first = next;
        while next < tokens.len() && tokens[next].end <= e {
            next += 1;
        }
        if first == next {
            continue;
        }
        let last = (first..next)
            .take_while(|&t| tokens[t].end - tokens[first].start <= options.max_chars)
            .last()
            .unwrap_or(first);
        let matches = (first..=last).filter(|&t| tokens[t].term.is_some()).count();
        if matches > 0 {
            fragments.push(Fragment {
                first,
                last,
                matches,
            });
        }
    }
    fragments
}

fn format_fragment(text: &str, tokens: &[Token], fragment: &Fragment) -> String {
    let mut out = String::new();
    let mut pos = tokens[fragment.first].start;
    for token in &tokens[fragment.first..=fragment.last] {
        let Some(term) = token.term else {
            continue;
        };
        escape_into(&mut out, &text[pos..token.start]);
        out.push_str(&format!("<strong class=\"match term{}\">", term));
        escape_into(&mut out, &text[token.start..token.end]);
        out.push_str("</strong>");
        pos = token.end;
    }
    escape_into(&mut out, &text[pos..tokens[fragment.last].end]);
    out
}

fn escape_into(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(q: &str) -> Vec<String> {
        query_terms(q)
    }

    #[test]
    fn highlights_single_match() {
        let excerpt = highlight(
            "Yo, this should totally be indexed.",
            &terms("totally"),
            &ExcerptOptions::default(),
        );
        assert_eq!(
            excerpt.as_deref(),
            Some("Yo, this should <strong class=\"match term0\">totally</strong> be indexed")
        );
    }

    #[test]
    fn no_match_means_no_excerpt() {
        assert_eq!(
            highlight("nothing here", &terms("absent"), &ExcerptOptions::default()),
            None
        );
    }

    #[test]
    fn term_classes_follow_query_order() {
        let excerpt = highlight("beta then Alpha", &terms("alpha beta"), &ExcerptOptions::default())
            .unwrap();
        assert_eq!(
            excerpt,
            "<strong class=\"match term1\">beta</strong> then <strong class=\"match term0\">Alpha</strong>"
        );
    }

    #[test]
    fn distant_matches_become_separate_fragments() {
        let filler = "word ".repeat(40);
        let text = format!("first needle {}second needle", filler);
        let excerpt = highlight(&text, &terms("needle"), &ExcerptOptions::default()).unwrap();
        assert_eq!(excerpt.matches(FRAGMENT_SEPARATOR).count(), 1);
        assert!(excerpt.starts_with("first <strong"));
        assert!(excerpt.ends_with("second <strong class=\"match term0\">needle</strong>"));
    }

    #[test]
    fn keeps_best_three_fragments() {
        let filler = "pad ".repeat(20);
        let text = format!(
            "a x {f}b x x {f}c x x {f}d x x {f}e x",
            f = filler
        );
        let excerpt = highlight(&text, &terms("x"), &ExcerptOptions::default()).unwrap();
        assert_eq!(excerpt.matches(FRAGMENT_SEPARATOR).count(), 2);
        assert!(!excerpt.contains("a <strong"));
        assert!(excerpt.contains("b <strong"));
    }

    #[test]
    fn escapes_surrounding_text() {
        let excerpt = highlight("a <b> & key", &terms("key"), &ExcerptOptions::default()).unwrap();
        assert_eq!(
            excerpt,
            "a &lt;b&gt; &amp; <strong class=\"match term0\">key</strong>"
        );
    }

    #[test]
    fn fragment_length_is_capped() {
        let text = format!("key {}", "long ".repeat(200));
        let options = ExcerptOptions {
            surround: 1000,
            max_chars: 50,
            ..ExcerptOptions::default()
        };
        let excerpt = highlight(&text, &terms("key"), &options).unwrap();
        let plain = excerpt
            .replace("<strong class=\"match term0\">", "")
            .replace("</strong>", "");
        assert!(plain.len() <= 50);
    }

    #[test]
    fn sentence_fragmenter_keeps_whole_sentences() {
        let options = ExcerptOptions {
            fragmenter: Fragmenter::Sentence,
            ..ExcerptOptions::default()
        };
        let excerpt = highlight(
            "Nothing to see. The quick fox jumps! Also unrelated.",
            &terms("fox"),
            &options,
        )
        .unwrap();
        assert_eq!(
            excerpt,
            "The quick <strong class=\"match term0\">fox</strong> jumps"
        );
    }

    #[test]
    fn sentence_fragmenter_finds_late_sentences() {
        let options = ExcerptOptions {
            fragmenter: Fragmenter::Sentence,
            ..ExcerptOptions::default()
        };
        let mut text = "Filler sentence here. ".repeat(5000);
        text.push_str("The needle sits here. ");
        text.push_str(&"More filler follows. ".repeat(1000));
        text.push_str("Another needle at the end.");

        let excerpt = highlight(&text, &terms("needle"), &options).unwrap();
        assert_eq!(
            excerpt,
            format!(
                "The <strong class=\"match term0\">needle</strong> sits here{}Another \
                 <strong class=\"match term0\">needle</strong> at the end",
                FRAGMENT_SEPARATOR
            )
        );
    }

    #[test]
    fn underscores_split_words() {
        let excerpt =
            highlight("call foo_bar now", &terms("foo_bar"), &ExcerptOptions::default()).unwrap();
        assert_eq!(
            excerpt,
            "call <strong class=\"match term0\">foo</strong>_<strong class=\"match term1\">bar</strong> now"
        );
    }

    #[test]
    fn diacritics_are_ignored() {
        let excerpt =
            highlight("Un café noir", &terms("cafe"), &ExcerptOptions::default()).unwrap();
        assert_eq!(excerpt, "Un <strong class=\"match term0\">café</strong> noir");

        let excerpt =
            highlight("plain cafe", &terms("CAFÉ"), &ExcerptOptions::default()).unwrap();
        assert_eq!(excerpt, "plain <strong class=\"match term0\">cafe</strong>");
    }

    #[test]
    fn parses_fragmenter_names() {
        assert_eq!("sentence".parse::<Fragmenter>(), Ok(Fragmenter::Sentence));
        assert!("words".parse::<Fragmenter>().is_err());
    }

    #[test]
    fn query_terms_are_lowercased_and_unique() {
        assert_eq!(terms("Foo bar, foo!"), vec!["foo", "bar"]);
        assert_eq!(terms("Émile_emile"), vec!["emile"]);
        assert!(terms("  ").is_empty());
    }
}
