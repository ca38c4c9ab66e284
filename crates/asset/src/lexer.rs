//! Line-oriented tokenizer shared by the OBJ and MTL parsers.
//!
//! Each non-blank, non-comment line becomes one [`Directive`]: a keyword plus
//! whitespace-separated arguments. Typed accessors turn malformed tokens into
//! [`AssetError::Parse`] with the file and 1-based line number.

use std::path::Path;

use crate::error::{AssetError, AssetResult};

/// Iterator over the directives of one text file.
pub struct Lexer<'a> {
    file: &'a Path,
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(file: &'a Path, text: &'a str) -> Self {
        Self {
            file,
            lines: text.lines().enumerate(),
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Directive<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        for (line_no, raw) in self.lines.by_ref() {
            let content = match raw.find('#') {
                Some(at) => &raw[..at],
                None => raw,
            };
            let mut tokens = content.split_whitespace();
            let Some(keyword) = tokens.next() else {
                continue;
            };
            return Some(Directive {
                file: self.file,
                line: line_no + 1,
                keyword,
                args: tokens.collect(),
                pos: 0,
            });
        }
        None
    }
}

/// One tokenized line.
#[derive(Debug)]
pub struct Directive<'a> {
    file: &'a Path,
    pub line: usize,
    pub keyword: &'a str,
    args: Vec<&'a str>,
    pos: usize,
}

impl<'a> Directive<'a> {
    /// Build a parse error pointing at this line.
    pub fn error(&self, message: impl Into<String>) -> AssetError {
        AssetError::Parse {
            file: self.file.to_path_buf(),
            line: self.line,
            message: message.into(),
        }
    }

    pub fn next_token(&mut self, what: &str) -> AssetResult<&'a str> {
        let token = self
            .args
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.error(format!("missing {} after '{}'", what, self.keyword)))?;
        self.pos += 1;
        Ok(token)
    }

    pub fn next_f32(&mut self, what: &str) -> AssetResult<f32> {
        let token = self.next_token(what)?;
        self.parse_f32(token, what)
    }

    /// Parse an optional trailing component.
    pub fn opt_f32(&mut self, what: &str) -> AssetResult<Option<f32>> {
        if self.pos >= self.args.len() {
            return Ok(None);
        }
        self.next_f32(what).map(Some)
    }

    pub fn next_vec3(&mut self, what: &str) -> AssetResult<[f32; 3]> {
        Ok([
            self.next_f32(what)?,
            self.next_f32(what)?,
            self.next_f32(what)?,
        ])
    }

    pub fn next_u32(&mut self, what: &str) -> AssetResult<u32> {
        let token = self.next_token(what)?;
        token
            .parse::<u32>()
            .map_err(|_| self.error(format!("invalid {} '{}'", what, token)))
    }

    /// Last argument of the line. Map directives put options before the path.
    pub fn last_token(&self, what: &str) -> AssetResult<&'a str> {
        self.args
            .last()
            .copied()
            .ok_or_else(|| self.error(format!("missing {} after '{}'", what, self.keyword)))
    }

    /// Arguments not consumed yet.
    pub fn remaining(&self) -> &[&'a str] {
        &self.args[self.pos.min(self.args.len())..]
    }

    fn parse_f32(&self, token: &str, what: &str) -> AssetResult<f32> {
        match token.parse::<f32>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(self.error(format!("invalid {} '{}'", what, token))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(text: &str) -> Vec<(usize, String, Vec<String>)> {
        Lexer::new(Path::new("t.obj"), text)
            .map(|d| {
                let args = d.remaining().iter().map(|s| s.to_string()).collect();
                (d.line, d.keyword.to_string(), args)
            })
            .collect()
    }

    #[test]
    fn skips_blank_lines_and_comments() {
        let out = lex("# header\n\n  v 1 2 3 # trailing\n\tf 1 2 3\n");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].0, 3);
        assert_eq!(out[0].1, "v");
        assert_eq!(out[0].2, vec!["1", "2", "3"]);
        assert_eq!(out[1].0, 4);
        assert_eq!(out[1].1, "f");
    }

    #[test]
    fn malformed_numbers_are_parse_errors() {
        let mut d = Lexer::new(Path::new("t.obj"), "v 1.0 abc 3").next().unwrap();
        assert_eq!(d.next_f32("x").unwrap(), 1.0);
        let err = d.next_f32("y").unwrap_err();
        assert!(matches!(err, AssetError::Parse { line: 1, .. }));
        assert!(err.to_string().contains("invalid y 'abc'"));
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        let mut d = Lexer::new(Path::new("t.obj"), "v nan 0 0").next().unwrap();
        assert!(d.next_f32("x").is_err());
    }

    #[test]
    fn missing_and_optional_components() {
        let mut d = Lexer::new(Path::new("t.obj"), "vt 0.5").next().unwrap();
        assert_eq!(d.next_f32("u").unwrap(), 0.5);
        assert_eq!(d.opt_f32("v").unwrap(), None);
        assert!(d.next_f32("v").is_err());
    }

    #[test]
    fn last_token_skips_options() {
        let d = Lexer::new(Path::new("t.mtl"), "map_Kd -s 1 1 1 tex/wood.png")
            .next()
            .unwrap();
        assert_eq!(d.last_token("path").unwrap(), "tex/wood.png");
    }
}
