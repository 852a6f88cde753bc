//! DBGp command lines.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::DbgpError;

/// One client command: verb, transaction id, `-flag value` pairs, optional data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command verb, e.g. `breakpoint_set`.
    pub name: String,
    /// Transaction id echoed back by the engine.
    pub transaction_id: u32,
    /// Flag/value pairs in the order they are sent.
    pub args: Vec<(char, String)>,
    /// Raw inline data, sent base64 encoded after `--`.
    pub data: Option<Vec<u8>>,
}

impl Command {
    /// Create a command with no arguments.
    #[must_use]
    pub fn new(name: impl Into<String>, transaction_id: u32) -> Self {
        Self {
            name: name.into(),
            transaction_id,
            args: Vec::new(),
            data: None,
        }
    }

    /// Append a `-flag value` pair.
    #[must_use]
    pub fn with_arg(mut self, flag: char, value: impl Into<String>) -> Self {
        self.args.push((flag, value.into()));
        self
    }

    /// Append several `-flag value` pairs.
    #[must_use]
    pub fn with_args<I, V>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = (char, V)>,
        V: Into<String>,
    {
        self.args
            .extend(args.into_iter().map(|(flag, value)| (flag, value.into())));
        self
    }

    /// Attach inline data.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Look up the first value for a flag.
    #[must_use]
    pub fn arg(&self, flag: char) -> Option<&str> {
        self.args
            .iter()
            .find(|(f, _)| *f == flag)
            .map(|(_, v)| v.as_str())
    }

    /// Render the command line, without the trailing NUL.
    #[must_use]
    pub fn to_line(&self) -> String {
        let mut line = format!("{} -i {}", self.name, self.transaction_id);
        for (flag, value) in &self.args {
            line.push_str(" -");
            line.push(*flag);
            line.push(' ');
            line.push_str(&quote(value));
        }
        if let Some(data) = &self.data {
            line.push_str(" -- ");
            line.push_str(&BASE64.encode(data));
        }
        line
    }

    /// Parse a command line as an engine would.
    ///
    /// # Errors
    /// Returns `Protocol` if the line is empty, unbalanced, lacks `-i`,
    /// or carries invalid base64 data.
    pub fn parse(line: &str) -> Result<Self, DbgpError> {
        let tokens = shlex::split(line)
            .ok_or_else(|| DbgpError::Protocol(format!("unbalanced quotes in command: {line}")))?;
        let mut tokens = tokens.into_iter();
        let name = tokens
            .next()
            .ok_or_else(|| DbgpError::Protocol("empty command".to_string()))?;

        let mut transaction_id = None;
        let mut args = Vec::new();
        let mut data = None;

        while let Some(token) = tokens.next() {
            if token == "--" {
                let encoded: String = tokens.by_ref().collect();
                let decoded = BASE64
                    .decode(encoded.as_bytes())
                    .map_err(|e| DbgpError::Protocol(format!("invalid inline data: {e}")))?;
                data = Some(decoded);
                break;
            }
            let flag = flag_of(&token)
                .ok_or_else(|| DbgpError::Protocol(format!("expected -flag, got {token:?}")))?;
            let value = tokens
                .next()
                .ok_or_else(|| DbgpError::Protocol(format!("flag -{flag} has no value")))?;
            if flag == 'i' {
                let id = value
                    .parse()
                    .map_err(|_| DbgpError::Protocol(format!("invalid transaction id {value:?}")))?;
                transaction_id = Some(id);
            } else {
                args.push((flag, value));
            }
        }

        let transaction_id = transaction_id
            .ok_or_else(|| DbgpError::Protocol(format!("{name} has no transaction id")))?;
        Ok(Self {
            name,
            transaction_id,
            args,
            data,
        })
    }
}

fn flag_of(token: &str) -> Option<char> {
    let mut chars = token.strip_prefix('-')?.chars();
    let flag = chars.next()?;
    chars.next().is_none().then_some(flag)
}

fn quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\\' | '\'' | '#'));
    if !needs_quotes {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
