//! Declared parameters of an OOC command and parsing of its argument string.

use crate::CommandError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
}

/// One declared parameter. A trailing `String` parameter swallows the rest
/// of the line, spaces included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    pub ty: ParamType,
    pub optional: bool,
}

impl Param {
    pub const fn string(name: &'static str) -> Self {
        Self {
            name,
            ty: ParamType::String,
            optional: false,
        }
    }

    pub const fn integer(name: &'static str) -> Self {
        Self {
            name,
            ty: ParamType::Integer,
            optional: false,
        }
    }

    pub const fn optional(self) -> Self {
        Self {
            optional: true,
            ..self
        }
    }

    fn usage(&self) -> String {
        if self.optional {
            format!("[{}]", self.name)
        } else {
            format!("<{}>", self.name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(String),
    Integer(i64),
}

/// Parsed values, one slot per declared parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedArgs {
    values: Vec<Option<Value>>,
}

impl ParsedArgs {
    pub fn string(&self, index: usize) -> Option<&str> {
        match self.values.get(index)? {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn integer(&self, index: usize) -> Option<i64> {
        match self.values.get(index)? {
            Some(Value::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }
}

/// Render `<required> [optional]` for help output.
pub fn usage(params: &[Param]) -> String {
    params
        .iter()
        .map(Param::usage)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse `raw` against `params`.
pub fn parse(raw: &str, params: &[Param]) -> Result<ParsedArgs, CommandError> {
    let mut rest = raw.trim();
    let mut values = Vec::with_capacity(params.len());

    for (i, param) in params.iter().enumerate() {
        let token = if i + 1 == params.len() && param.ty == ParamType::String {
            std::mem::take(&mut rest)
        } else {
            match rest.split_once(char::is_whitespace) {
                Some((token, tail)) => {
                    rest = tail.trim_start();
                    token
                }
                None => std::mem::take(&mut rest),
            }
        };

        if token.is_empty() {
            if !param.optional {
                return Err(CommandError::Argument(format!(
                    "Missing argument: {}.",
                    param.name
                )));
            }
            values.push(None);
            continue;
        }

        let value = match param.ty {
            ParamType::String => Value::String(token.to_string()),
            ParamType::Integer => token.parse().map(Value::Integer).map_err(|_| {
                CommandError::Argument(format!("{} must be a number.", param.name))
            })?,
        };
        values.push(Some(value));
    }

    if !rest.is_empty() {
        return Err(CommandError::Argument("Too many arguments.".into()));
    }
    Ok(ParsedArgs { values })
}
