//! Appender Patterns
//!
//! Pattern tokens select which monitors, relative to the configured one, an
//! appender is attached to. Each token is expanded into an anchored regex over
//! fully qualified names rooted at `<ROOT>`.
//!
//! | Token     | Matches                                   |
//! |-----------|-------------------------------------------|
//! | `.`       | the monitor itself                        |
//! | `/*`      | immediate children only                   |
//! | `./*`     | the monitor and its immediate children    |
//! | `/**`     | all descendants only                      |
//! | `./**`    | the monitor and all descendants           |
//! | `/glob`   | descendants matching `glob`               |
//! | `./glob`  | the monitor and descendants matching `glob` |
//!
//! In a glob `*` matches within one name segment, `**` across segments, `?`
//! one character, and `/` (or `.`) separates segments.

use crate::core::limits::ROOT_MONITOR_NAME;
use crate::core::PatternError;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AppenderPattern {
    ParentOnly,
    ChildrenOnly,
    ParentAndChildren,
    AllDescendants,
    ParentAndAllDescendants,
    Custom { include_parent: bool, glob: String },
}

impl FromStr for AppenderPattern {
    type Err = PatternError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let token = token.trim();
        match token {
            "" => Err(PatternError::Empty),
            "." => Ok(Self::ParentOnly),
            "/*" => Ok(Self::ChildrenOnly),
            "./*" => Ok(Self::ParentAndChildren),
            "/**" => Ok(Self::AllDescendants),
            "./**" => Ok(Self::ParentAndAllDescendants),
            _ => {
                let (include_parent, glob) = if let Some(rest) = token.strip_prefix("./") {
                    (true, rest)
                } else if let Some(rest) = token.strip_prefix('/') {
                    (false, rest)
                } else {
                    return Err(PatternError::Invalid(token.to_string()));
                };
                validate_glob(token, glob)?;
                Ok(Self::Custom {
                    include_parent,
                    glob: glob.to_string(),
                })
            }
        }
    }
}

impl fmt::Display for AppenderPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParentOnly => write!(f, "."),
            Self::ChildrenOnly => write!(f, "/*"),
            Self::ParentAndChildren => write!(f, "./*"),
            Self::AllDescendants => write!(f, "/**"),
            Self::ParentAndAllDescendants => write!(f, "./**"),
            Self::Custom {
                include_parent: true,
                glob,
            } => write!(f, "./{}", glob),
            Self::Custom {
                include_parent: false,
                glob,
            } => write!(f, "/{}", glob),
        }
    }
}

impl AppenderPattern {
    /// Anchored regex text matching the qualified names this pattern selects
    /// relative to `monitor`
    pub fn regex_for(&self, monitor: &str) -> String {
        let parent = regex::escape(&qualified_name(monitor));
        let (include_parent, tail) = match self {
            Self::ParentOnly => return format!("^{}$", parent),
            Self::ChildrenOnly => (false, r"\.[^.]+".to_string()),
            Self::ParentAndChildren => (true, r"\.[^.]+".to_string()),
            Self::AllDescendants => (false, r"\..+".to_string()),
            Self::ParentAndAllDescendants => (true, r"\..+".to_string()),
            Self::Custom {
                include_parent,
                glob,
            } => (*include_parent, format!(r"\.{}", glob_to_regex(glob))),
        };

        if include_parent {
            format!("^{}(?:{})?$", parent, tail)
        } else {
            format!("^{}{}$", parent, tail)
        }
    }
}

/// `<ROOT>`-rooted form of a monitor name
pub fn qualified_name(monitor: &str) -> String {
    if monitor.is_empty() || monitor == ROOT_MONITOR_NAME {
        ROOT_MONITOR_NAME.to_string()
    } else {
        format!("{}.{}", ROOT_MONITOR_NAME, monitor)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '$' | '#' | ':' | '<' | '>')
}

fn validate_glob(token: &str, glob: &str) -> Result<(), PatternError> {
    let valid = !glob.is_empty()
        && !glob.starts_with(['/', '.'])
        && !glob.ends_with(['/', '.'])
        && glob
            .chars()
            .all(|c| is_name_char(c) || matches!(c, '*' | '?' | '/' | '.'));
    if valid {
        Ok(())
    } else {
        Err(PatternError::Invalid(token.to_string()))
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^.]*"),
            '?' => out.push_str("[^.]"),
            '/' | '.' => out.push_str(r"\."),
            other => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(other.encode_utf8(&mut buf)));
            }
        }
    }
    out
}
