use super::bag::ErrorBag;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Inner error decorated with the place it was wrapped at. Created via the
/// `err_from!`, `err_create!` and `err_custom_create!` macros, never by hand.
#[derive(Debug)]
pub struct ExecutorError {
    pub inner: ErrorBag,
    pub msg: Option<String>,
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

impl Display for ExecutorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(msg) = &self.msg {
            write!(
                f,
                "{} - {} at {}:{}:{}",
                msg, self.inner, self.file, self.line, self.column
            )
        } else {
            write!(
                f,
                "{} at {}:{}:{}",
                self.inner, self.file, self.line, self.column
            )
        }
    }
}

impl Error for ExecutorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.inner)
    }
}
