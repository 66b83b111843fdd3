use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use std::{borrow::Cow, fmt};

/// One external command: a program and its arguments, nothing else.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[cfg(test)]
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    #[cfg(test)]
    /// Position of the first occurrence of `arg`
    pub fn position(&self, arg: &str) -> Option<usize> {
        self.args.iter().position(|a| a == arg)
    }

    #[cfg(test)]
    /// Values following every occurrence of `flag`, e.g. all `-v` pairs
    pub fn values_of<'a>(&'a self, flag: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.args
            .iter()
            .tuple_windows()
            .filter(move |(f, _)| *f == flag)
            .map(|(_, v)| v.as_str())
    }
}

/// Quotes a word for a POSIX shell, leaving it alone when it is safe as-is.
pub fn quote(word: &str) -> Cow<'_, str> {
    lazy_static! {
        static ref SAFE: Regex = Regex::new(r"^[A-Za-z0-9_@%+=:,./-]+$").unwrap();
    }

    if SAFE.is_match(word) {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', r"'\''")))
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|w| quote(w))
            .join(" ");
        write!(f, "{}", line)
    }
}
