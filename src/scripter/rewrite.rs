//! Rewrite rules: `X<D>find<D>replace<D>` parsed once, applied in order.
//!
//! `X` selects the mode: `s` replaces the literal `find` string, `r`
//! compiles `find` as a regular expression (replacement backreferences use
//! the `$1` / `${name}` syntax). `<D>` is whatever character follows the
//! mode letter; a literal delimiter inside find or replace must be escaped
//! as `\<D>`.

use regex::Regex;

use crate::error::SkwError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteMode {
    Literal,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRule {
    pub mode: RewriteMode,
    pub find: String,
    pub replace: String,
}

impl RewriteRule {
    pub fn parse(raw: &str) -> Result<Self, SkwError> {
        let malformed = |reason: &str| SkwError::RuleMalformed {
            rule: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut chars = raw.chars();
        let mode = match chars.next() {
            Some('s') => RewriteMode::Literal,
            Some('r') => RewriteMode::Regex,
            _ => return Err(malformed("mode must be 's' (literal) or 'r' (regex)")),
        };
        let delimiter = chars
            .next()
            .ok_or_else(|| malformed("missing delimiter"))?;

        let mut fields: Vec<String> = vec![String::new()];
        let mut escaped = false;
        for c in chars {
            if escaped {
                // Only the delimiter escape is consumed; other backslash
                // sequences pass through for the regex engine.
                if c != delimiter {
                    fields.last_mut().expect("field").push('\\');
                }
                fields.last_mut().expect("field").push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == delimiter {
                fields.push(String::new());
            } else {
                fields.last_mut().expect("field").push(c);
            }
        }
        if escaped {
            fields.last_mut().expect("field").push('\\');
        }

        // A trailing delimiter leaves one empty field behind.
        if fields.len() == 3 && fields[2].is_empty() {
            fields.pop();
        }
        if fields.len() < 2 {
            return Err(malformed("expected '<mode><d>find<d>replace<d>'"));
        }
        if fields.len() > 2 {
            return Err(malformed("unescaped delimiter in find or replace"));
        }
        let replace = fields.pop().expect("replace field");
        let find = fields.pop().expect("find field");
        if find.is_empty() {
            return Err(malformed("empty find pattern"));
        }

        Ok(Self {
            mode,
            find,
            replace,
        })
    }

    /// Rewrite every non-overlapping occurrence in `input`.
    pub fn apply(&self, input: &str) -> Result<String, SkwError> {
        match self.mode {
            RewriteMode::Literal => Ok(input.replace(&self.find, &self.replace)),
            RewriteMode::Regex => {
                let re = Regex::new(&self.find).map_err(|e| SkwError::RuleMalformed {
                    rule: format!("r/{}/{}/", self.find, self.replace),
                    reason: e.to_string(),
                })?;
                Ok(re.replace_all(input, self.replace.as_str()).into_owned())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_modes_and_arbitrary_delimiters() {
        let rule = RewriteRule::parse("s/foo/bar/").unwrap();
        assert_eq!(rule.mode, RewriteMode::Literal);
        assert_eq!(rule.find, "foo");
        assert_eq!(rule.replace, "bar");

        let rule = RewriteRule::parse("r|make -j([0-9]+)|make -j1|").unwrap();
        assert_eq!(rule.mode, RewriteMode::Regex);
        assert_eq!(rule.find, "make -j([0-9]+)");

        let rule = RewriteRule::parse("s#a#b#").unwrap();
        assert_eq!((rule.find.as_str(), rule.replace.as_str()), ("a", "b"));
    }

    #[test]
    fn trailing_delimiter_is_optional() {
        let rule = RewriteRule::parse("s/foo/bar").unwrap();
        assert_eq!(rule.replace, "bar");
    }

    #[test]
    fn empty_replacement_deletes() {
        let rule = RewriteRule::parse("s/--verbose//").unwrap();
        assert_eq!(rule.apply("make --verbose install").unwrap(), "make  install");
    }

    #[test]
    fn escaped_delimiter_is_literal() {
        let rule = RewriteRule::parse(r"s/\/usr\/local/\/usr/").unwrap();
        assert_eq!(rule.find, "/usr/local");
        assert_eq!(rule.replace, "/usr");
        assert_eq!(rule.apply("cp x /usr/local/bin").unwrap(), "cp x /usr/bin");
    }

    #[test]
    fn regex_backreferences_use_dollar_syntax() {
        let rule = RewriteRule::parse("r/configure --prefix=(\\S+)/configure --prefix=$1 --static/").unwrap();
        assert_eq!(
            rule.apply("./configure --prefix=/usr").unwrap(),
            "./configure --prefix=/usr --static"
        );
    }

    #[test]
    fn literal_mode_does_not_interpret_metacharacters() {
        let rule = RewriteRule::parse("s/a.c/xyz/").unwrap();
        assert_eq!(rule.apply("abc a.c").unwrap(), "abc xyz");
    }

    #[test]
    fn malformed_rules_are_rejected() {
        assert!(RewriteRule::parse("x/foo/bar/").is_err());
        assert!(RewriteRule::parse("s").is_err());
        assert!(RewriteRule::parse("s//bar/").is_err());
        assert!(RewriteRule::parse("s/a/b/c/").is_err());
    }

    #[test]
    fn invalid_regex_is_reported_at_apply_time() {
        let rule = RewriteRule::parse("r/(unclosed/x/").unwrap();
        let err = rule.apply("anything").unwrap_err();
        assert!(matches!(err, SkwError::RuleMalformed { .. }));
    }
}
