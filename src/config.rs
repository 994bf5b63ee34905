use std::fmt;
use std::str::FromStr;

/// Default size of stack memory, in bytes.
pub const DEFAULT_STACK_SIZE: usize = 256;
/// Default amount of instructions executed before the engine gives up.
pub const DEFAULT_MAX_STEPS: u64 = 10_000;

/// Everything that can be tuned about loading and running a program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Size of stack memory in bytes.
    pub stack_size: usize,
    /// Absolute address of the first stack byte. SP starts at `stack_base + stack_size`.
    pub stack_base: u64,
    /// Safety valve against runaway loops.
    pub max_steps: u64,
    pub comments: CommentStyle,
    pub labels: LabelPolicy,
    /// Start with `Z = 1`, matching a register file that is all zeros.
    pub zero_flag_on_reset: bool,
    /// Record every executed instruction.
    pub trace: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            stack_size: DEFAULT_STACK_SIZE,
            stack_base: 0,
            max_steps: DEFAULT_MAX_STEPS,
            comments: CommentStyle::default(),
            labels: LabelPolicy::default(),
            zero_flag_on_reset: false,
            trace: false,
        }
    }
}

/// What to do when a label is defined more than once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LabelPolicy {
    /// Fail the load.
    #[default]
    Reject,
    /// The last definition wins.
    LastWins,
}

/// Set of markers which start a trailing comment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommentStyle {
    /// `//`
    pub slash: bool,
    /// `;`
    pub semicolon: bool,
    /// `#`, only where it cannot be an immediate
    pub hash: bool,
    /// `@`
    pub at: bool,
}

impl Default for CommentStyle {
    fn default() -> Self {
        CommentStyle {
            slash: true,
            semicolon: true,
            hash: false,
            at: false,
        }
    }
}

impl CommentStyle {
    pub fn none() -> Self {
        CommentStyle {
            slash: false,
            semicolon: false,
            hash: false,
            at: false,
        }
    }

    /// Byte index at which the trailing comment of `line` begins, if any.
    ///
    /// A `#` only counts when it starts the line, or follows whitespace that is not itself
    /// preceded by `,` or `[`. Immediates always follow one of those.
    pub fn comment_start(&self, line: &str) -> Option<usize> {
        let bytes = line.as_bytes();
        for (i, &b) in bytes.iter().enumerate() {
            let found = match b {
                b'/' => self.slash && bytes.get(i + 1) == Some(&b'/'),
                b';' => self.semicolon,
                b'@' => self.at,
                b'#' => self.hash && is_hash_comment(&bytes[..i]),
                _ => false,
            };
            if found {
                return Some(i);
            }
        }
        None
    }

    /// `line` without its trailing comment.
    pub fn strip<'a>(&self, line: &'a str) -> &'a str {
        match self.comment_start(line) {
            Some(i) => &line[..i],
            None => line,
        }
    }
}

fn is_hash_comment(before: &[u8]) -> bool {
    let trimmed = before.trim_ascii_end();
    if trimmed.is_empty() {
        return true;
    }
    // `#` glued to the previous token is part of it
    if trimmed.len() == before.len() {
        return false;
    }
    !matches!(trimmed.last(), Some(b',') | Some(b'['))
}

impl FromStr for CommentStyle {
    type Err = String;
    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let mut style = Self::none();
        for word in string.split(',') {
            let value = match word.trim() {
                "" => continue,
                "slash" | "//" => &mut style.slash,
                "semicolon" | ";" => &mut style.semicolon,
                "hash" | "#" => &mut style.hash,
                "at" | "@" => &mut style.at,
                _ => return Err(format!("Unknown comment style '{}'", word)),
            };
            if *value {
                return Err(format!("Cannot specify comment style '{}' twice", word));
            }
            *value = true;
        }
        Ok(style)
    }
}

impl fmt::Display for CommentStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let styles = [
            ("slash", self.slash),
            ("semicolon", self.semicolon),
            ("hash", self.hash),
            ("at", self.at),
        ];
        let mut has_any_style = false;
        for (name, value) in styles {
            if !value {
                continue;
            }
            if has_any_style {
                write!(f, ",")?;
            }
            write!(f, "{}", name)?;
            has_any_style = true;
        }
        Ok(())
    }
}
