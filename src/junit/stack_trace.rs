//! Java stack traces as printed by `Throwable.printStackTrace`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceLine {
    pub klass_name: String,
    pub method_name: String,
    pub file_name: Option<String>,
    /// `-1` when unknown, `-2` for native methods.
    pub line_number: i32,
}

impl StackTraceLine {
    /// Parse one `at pkg.Klass.method(File.java:12)` frame.
    fn parse(line: &str) -> Option<Self> {
        let frame = line.trim().strip_prefix("at")?.trim_start();
        let (qualified, rest) = frame.split_once('(')?;
        let (location, _) = rest.split_once(')')?;

        // Module prefixes such as `java.base/` are dropped
        let qualified = qualified.trim();
        let qualified = qualified.rsplit_once('/').map_or(qualified, |(_, q)| q);
        let (klass_name, method_name) = qualified.rsplit_once('.').unwrap_or((qualified, ""));

        let (file_name, line_number) = match location {
            "Native Method" => (None, -2),
            "Unknown Source" => (None, -1),
            _ => match location.rsplit_once(':') {
                Some((file, line)) => (Some(file.to_string()), line.parse().unwrap_or(-1)),
                None => (Some(location.to_string()), -1),
            },
        };

        Some(Self {
            klass_name: klass_name.to_string(),
            method_name: method_name.to_string(),
            file_name,
            line_number,
        })
    }
}

impl std::fmt::Display for StackTraceLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}(", self.klass_name, self.method_name)?;
        match (&self.file_name, self.line_number) {
            (None, -2) => write!(f, "Native Method)"),
            (None, _) => write!(f, "Unknown Source)"),
            (Some(file), n) if n >= 0 => write!(f, "{}:{})", file, n),
            (Some(file), _) => write!(f, "{})", file),
        }
    }
}

/// The first line of a trace plus its frames, without any `Caused by:` chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTrace {
    pub first_line: String,
    pub stack_trace_lines: Vec<StackTraceLine>,
}

impl StackTrace {
    /// Parse printed trace text. Returns `None` for blank input.
    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .take_while(|l| !l.trim_start().starts_with("Caused by:"));

        let first_line = lines.next()?.trim_end().to_string();
        let stack_trace_lines = lines
            .skip_while(|l| !l.trim_start().starts_with("at "))
            .filter_map(StackTraceLine::parse)
            .collect();

        Some(Self {
            first_line,
            stack_trace_lines,
        })
    }

    /// Class name of the thrown exception.
    pub fn throwable(&self) -> &str {
        self.first_line
            .split_once(':')
            .map_or(self.first_line.as_str(), |(t, _)| t)
            .trim()
    }

    pub fn is_assertion_error(&self) -> bool {
        self.throwable().ends_with("AssertionError")
    }

    pub fn len(&self) -> usize {
        self.stack_trace_lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack_trace_lines.is_empty()
    }

    /// Same throwable, and every frame of `self` appears as a contiguous run in `other`.
    pub fn is_contained_in(&self, other: &StackTrace) -> bool {
        if self.throwable() != other.throwable() {
            return false;
        }
        if self.is_empty() {
            return true;
        }
        other
            .stack_trace_lines
            .windows(self.len())
            .any(|window| window == self.stack_trace_lines.as_slice())
    }
}

impl std::fmt::Display for StackTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.first_line)?;
        for line in &self.stack_trace_lines {
            writeln!(f, "\tat {}", line)?;
        }
        Ok(())
    }
}
