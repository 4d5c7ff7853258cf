//! Endpoint name composition and pattern matching.
//!
//! Every file in the table is exposed under `prefix + logical_name +
//! method_suffix`. Index files additionally answer at the directory-level
//! alias. Patterns use `*` wildcards; a `*` captures any run of characters,
//! including `/`.

/// HTTP method tags appended to logical filenames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Options,
    Head,
    Get,
    Put,
    Post,
}

impl Method {
    /// The name suffix for this method, including the separator.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Options => "/options",
            Self::Head => "/head",
            Self::Get => "/get",
            Self::Put => "/put",
            Self::Post => "/post",
        }
    }

    /// Uppercased tag used in `allow` headers.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Options => "OPTIONS",
            Self::Head => "HEAD",
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
        }
    }

    pub fn from_tail(tail: &str) -> Option<Self> {
        match tail {
            "options" => Some(Self::Options),
            "head" => Some(Self::Head),
            "get" => Some(Self::Get),
            "put" => Some(Self::Put),
            "post" => Some(Self::Post),
            _ => None,
        }
    }
}

/// Index filenames that earn a directory-level alias.
const INDEX_NAMES: [&str; 2] = ["index.htm", "index.html"];

/// Composes the endpoint name for `name` and `method`. The alias form
/// (trailing `/` or empty) takes the suffix without its separator so the
/// root alias maps to plain `get`, `head`, ...
pub fn endpoint(name: &str, method: Method) -> String {
    let suffix = method.suffix();
    if name.is_empty() || name.ends_with('/') {
        format!("{}{}", name, &suffix[1..])
    } else {
        format!("{}{}", name, suffix)
    }
}

/// Directory-level alias for an index file: the filename minus the index
/// segment (`dir/index.html` -> `dir/`, `index.html` -> ``).
pub fn index_alias(name: &str) -> Option<String> {
    let tail = match name.rfind('/') {
        Some(i) => &name[i + 1..],
        None => name,
    };
    if INDEX_NAMES.contains(&tail) {
        Some(name[..name.len() - tail.len()].to_owned())
    } else {
        None
    }
}

/// Splits an endpoint name into its logical path and trailing method
/// segment. Returns `None` when the tail is not a method tag.
pub fn split_method(endpoint: &str) -> Option<(&str, Method)> {
    let i = endpoint.rfind('/')?;
    let method = Method::from_tail(&endpoint[i + 1..])?;
    Some((&endpoint[..i], method))
}

/// True when the filename contains subscription pattern metacharacters and
/// therefore cannot be exposed as an endpoint.
pub fn has_metacharacters(name: &str) -> bool {
    name.contains('*') || name.contains('?')
}

/// Matches `name` against `pattern`, capturing the text consumed by each
/// `*`. A `*` matches any run of characters, `/` included.
pub fn pattern_match<'a>(pattern: &str, name: &'a str) -> Option<Vec<&'a str>> {
    let mut captures = Vec::new();
    if match_inner(pattern, name, &mut captures) {
        Some(captures)
    } else {
        None
    }
}

fn match_inner<'a>(pattern: &str, name: &'a str, captures: &mut Vec<&'a str>) -> bool {
    match pattern.find('*') {
        None => pattern == name,
        Some(i) => {
            let (literal, rest) = (&pattern[..i], &pattern[i + 1..]);
            let Some(tail) = name.strip_prefix(literal) else {
                return false;
            };
            // Longest capture first so `*` spans path separators.
            for end in (0..=tail.len()).rev() {
                if !tail.is_char_boundary(end) {
                    continue;
                }
                captures.push(&tail[..end]);
                if match_inner(rest, &tail[end..], captures) {
                    return true;
                }
                captures.pop();
            }
            false
        }
    }
}

/// Substitutes captured parameters into a target pattern, one capture per
/// `*` in order. Surplus wildcards substitute as empty.
pub fn pattern_substitute(target: &str, captures: &[&str]) -> String {
    let mut out = String::with_capacity(target.len());
    let mut captures = captures.iter();
    for (i, piece) in target.split('*').enumerate() {
        if i > 0 {
            out.push_str(captures.next().copied().unwrap_or(""));
        }
        out.push_str(piece);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composes_method_endpoints() {
        assert_eq!(endpoint("a.txt", Method::Get), "a.txt/get");
        assert_eq!(endpoint("dir/a.txt", Method::Put), "dir/a.txt/put");
    }

    #[test]
    fn alias_endpoints_skip_the_separator() {
        assert_eq!(endpoint("dir/", Method::Get), "dir/get");
        assert_eq!(endpoint("", Method::Head), "head");
    }

    #[test]
    fn recognizes_index_files() {
        assert_eq!(index_alias("dir/index.html").as_deref(), Some("dir/"));
        assert_eq!(index_alias("index.htm").as_deref(), Some(""));
        assert_eq!(index_alias("dir/page.html"), None);
        assert_eq!(index_alias("myindex.html"), None);
    }

    #[test]
    fn splits_method_tails() {
        assert_eq!(split_method("a.txt/get"), Some(("a.txt", Method::Get)));
        assert_eq!(split_method("dir/b/post"), Some(("dir/b", Method::Post)));
        assert_eq!(split_method("a.txt"), None);
        assert_eq!(split_method("a.txt/delete"), None);
    }

    #[test]
    fn wildcards_capture_across_separators() {
        assert_eq!(pattern_match("old/*", "old/a/b.txt"), Some(vec!["a/b.txt"]));
        assert_eq!(
            pattern_match("*/data/*.bin", "x/data/y.bin"),
            Some(vec!["x", "y"])
        );
        assert_eq!(pattern_match("old/*", "new/a.txt"), None);
    }

    #[test]
    fn substitution_reinserts_captures() {
        let caps = pattern_match("old/*", "old/a/b.txt").unwrap();
        assert_eq!(pattern_substitute("new/*", &caps), "new/a/b.txt");
        assert_eq!(pattern_substitute("flat", &caps), "flat");
    }
}
