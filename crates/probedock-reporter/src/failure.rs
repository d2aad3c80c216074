//! Failure descriptions and their Java-style rendering.
//!
//! ```text
//! RuntimeException: could not save cart
//!  at App.Cart.save(Cart.php:42)
//!  at App.Tests.CartTest.testSaves(CartTest.php:17)
//! Caused by: PDOException: connection refused
//!  at App.Db.connect(Db.php:9)
//!  ... 2 more
//! ```

use std::collections::HashSet;
use std::fmt::Write as _;

/// One stack frame, innermost first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackFrame {
    pub class: Option<String>,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl StackFrame {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: Some(function.into()),
            ..Default::default()
        }
    }

    pub fn in_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    /// Identity used to detect frames shared with an enclosing failure.
    fn location(&self) -> String {
        format!(
            "{}:{}:{}",
            self.file.as_deref().unwrap_or_default(),
            self.line.unwrap_or_default(),
            self.function.as_deref().unwrap_or_default()
        )
    }

    fn render(&self) -> String {
        let mut out = String::from(" at ");
        if let Some(class) = &self.class {
            out.push_str(&class.replace('\\', "."));
            out.push('.');
        }
        match &self.function {
            Some(function) => out.push_str(&function.replace('\\', ".")),
            None => out.push_str("(main)"),
        }
        match (&self.file, self.line) {
            (Some(file), Some(line)) => {
                let _ = write!(out, "({}:{})", basename(file), line);
            }
            (Some(file), None) => {
                let _ = write!(out, "({})", file);
            }
            (None, _) => out.push_str("(Unknown Source)"),
        }
        out
    }
}

fn basename(path: &str) -> &str {
    path.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(path)
}

/// A test failure or error, with its chain of causes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    /// Exception class name.
    pub class: String,
    pub message: String,
    pub frames: Vec<StackFrame>,
    pub cause: Option<Box<TestFailure>>,
}

impl TestFailure {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            frames: Vec::new(),
            cause: None,
        }
    }

    pub fn with_frame(mut self, frame: StackFrame) -> Self {
        self.frames.push(frame);
        self
    }

    pub fn caused_by(mut self, cause: TestFailure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Depth of the chain, this failure included.
    pub fn depth(&self) -> usize {
        1 + self.cause.as_ref().map_or(0, |c| c.depth())
    }

    /// Render the whole chain, outermost failure first.
    ///
    /// Each cause is prefixed with `Caused by: `. Once a cause reaches a frame
    /// already printed for an enclosing failure, the rest of its trace is
    /// summarized as ` ... N more`.
    pub fn format_chain(&self) -> String {
        let mut seen = HashSet::new();
        let mut lines = Vec::new();
        let mut current = Some(self);
        let mut nested = false;

        while let Some(failure) = current {
            let starter = if nested { "Caused by: " } else { "" };
            lines.push(format!("{}{}: {}", starter, failure.class, failure.message));

            for (index, frame) in failure.frames.iter().enumerate() {
                if !seen.insert(frame.location()) {
                    lines.push(format!(" ... {} more", failure.frames.len() - index));
                    break;
                }
                lines.push(frame.render());
            }

            current = failure.cause.as_deref();
            nested = true;
        }

        lines.join("\n")
    }
}
