use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Backend,
    NotFound,
    PartialFailure,
    Config,
    Io,
    Other,
}

#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
    code: Option<String>,
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::with_kind(ErrorKind::Other, msg)
    }

    pub fn with_kind<M: Into<String>>(kind: ErrorKind, msg: M) -> Self {
        Self {
            kind,
            msg: msg.into(),
            code: None,
        }
    }

    pub fn validation<M: Into<String>>(msg: M) -> Self {
        Self::with_kind(ErrorKind::Validation, msg)
    }

    pub fn not_found<M: Into<String>>(msg: M) -> Self {
        Self::with_kind(ErrorKind::NotFound, msg)
    }

    pub fn partial<M: Into<String>>(msg: M) -> Self {
        Self::with_kind(ErrorKind::PartialFailure, msg)
    }

    pub fn config<M: Into<String>>(msg: M) -> Self {
        Self::with_kind(ErrorKind::Config, msg)
    }

    pub fn backend<M: Into<String>>(code: Option<String>, msg: M) -> Self {
        Self {
            kind: ErrorKind::Backend,
            msg: msg.into(),
            code,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.msg
    }

    pub fn is_unknown_column(&self) -> bool {
        if self.kind != ErrorKind::Backend {
            return false;
        }
        matches!(self.code.as_deref(), Some("PGRST204") | Some("42703"))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code})", self.msg),
            None => write!(f, "{}", self.msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::with_kind(ErrorKind::Io, err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::msg(format!("JSON error: {err}"))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::backend(None, format!("request failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_column_only_for_schema_codes() {
        assert!(Error::backend(Some("PGRST204".into()), "no column").is_unknown_column());
        assert!(Error::backend(Some("42703".into()), "undefined").is_unknown_column());
        assert!(!Error::backend(Some("23505".into()), "dup key").is_unknown_column());
        assert!(!Error::validation("PGRST204").is_unknown_column());
    }

    #[test]
    fn display_includes_code() {
        let e = Error::backend(Some("23505".into()), "duplicate key");
        assert_eq!(e.to_string(), "duplicate key (23505)");
        assert_eq!(Error::msg("plain").to_string(), "plain");
    }
}
