//! JaCoCo XML report structure.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Report {
    #[serde(rename = "package", default)]
    pub packages: Vec<Package>,
}

#[derive(Debug, Deserialize)]
pub struct Package {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "class", default)]
    pub classes: Vec<Class>,
    #[serde(rename = "sourcefile", default)]
    pub source_files: Vec<SourceFile>,
}

#[derive(Debug, Deserialize)]
pub struct Class {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@sourcefilename")]
    pub source_file_name: Option<String>,
    #[serde(rename = "method", default)]
    pub methods: Vec<Method>,
}

#[derive(Debug, Deserialize)]
pub struct Method {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@desc")]
    pub desc: String,
    /// First source line; absent for synthetic methods without debug info
    #[serde(rename = "@line")]
    pub line: Option<u32>,
    #[serde(rename = "counter", default)]
    pub counters: Vec<Counter>,
}

#[derive(Debug, Deserialize)]
pub struct Counter {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "@missed")]
    pub missed: u64,
    #[serde(rename = "@covered")]
    pub covered: u64,
}

#[derive(Debug, Deserialize)]
pub struct SourceFile {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "line", default)]
    pub lines: Vec<Line>,
}

/// Per-line counters: missed/covered instructions and branches.
#[derive(Debug, Clone, Deserialize)]
pub struct Line {
    #[serde(rename = "@nr")]
    pub nr: u32,
    #[serde(rename = "@mi")]
    pub mi: u64,
    #[serde(rename = "@ci")]
    pub ci: u64,
    #[serde(rename = "@mb")]
    pub mb: u64,
    #[serde(rename = "@cb")]
    pub cb: u64,
}

impl Report {
    pub fn parse(xml: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(xml)
    }

    /// The class with the given internal name and its source file entry.
    pub fn class(&self, internal_name: &str) -> Option<(&Class, Option<&SourceFile>)> {
        self.packages.iter().find_map(|package| {
            let class = package.classes.iter().find(|c| c.name == internal_name)?;
            let source = class
                .source_file_name
                .as_deref()
                .and_then(|name| package.source_files.iter().find(|s| s.name == name));
            Some((class, source))
        })
    }
}

impl Method {
    /// `(covered, total)` of a counter type, zero when the counter is absent.
    pub fn counter(&self, kind: &str) -> (u64, u64) {
        self.counters
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| (c.covered, c.covered + c.missed))
            .unwrap_or((0, 0))
    }

    /// Default constructors and static initializers need not occupy a
    /// contiguous line range, so they only get aggregate counts.
    pub fn is_discontinuous(&self) -> bool {
        (self.name == "<init>" && self.desc == "()V") || self.name == "<clinit>"
    }
}

impl Line {
    pub fn instructions(&self) -> u64 {
        self.mi + self.ci
    }

    pub fn branches(&self) -> u64 {
        self.mb + self.cb
    }
}
