//! Assigns the flat list of source lines in a report to the methods that own them.
//!
//! A JaCoCo report lists each method with only its first line and its total
//! line count, and the source file as one flat list of lines. Method spans
//! are recovered by walking lines in order and closing the open method once
//! it has seen as many instruction-bearing lines as its `LINE` counter says.

use super::report::{Class, Line, Method, SourceFile};
use crate::model::{
    BranchId, ClassCoverageInfo, ClassId, CoverageInfo, InstructionId, LineId,
    MethodCoverageInfo, MethodId,
};
use std::collections::BTreeMap;

/// A method whose lines are being collected.
struct Bucket {
    method_id: MethodId,
    start_line: u32,
    expected_lines: u64,
    lines: BTreeMap<LineId, bool>,
    instructions: BTreeMap<InstructionId, bool>,
    branches: BTreeMap<BranchId, bool>,
}

impl Bucket {
    fn new(method: &Method, start_line: u32) -> Self {
        let (_, expected_lines) = method.counter("LINE");
        Self {
            method_id: MethodId::new(&method.name, &method.desc),
            start_line,
            expected_lines,
            lines: BTreeMap::new(),
            instructions: BTreeMap::new(),
            branches: BTreeMap::new(),
        }
    }

    fn add(&mut self, file_name: &str, line: &Line) {
        let line_id = LineId::new(file_name, line.nr);
        for offset in 0..line.instructions() {
            self.instructions.insert(
                InstructionId {
                    line: line_id.clone(),
                    offset: offset as u32,
                },
                offset < line.ci,
            );
        }
        for offset in 0..line.branches() {
            self.branches.insert(
                BranchId {
                    line: line_id.clone(),
                    offset: offset as u32,
                },
                offset < line.cb,
            );
        }
        self.lines.insert(line_id, line.ci > 0);
    }

    fn is_complete(&self) -> bool {
        self.lines.len() as u64 >= self.expected_lines
    }

    fn finish(self) -> MethodCoverageInfo {
        MethodCoverageInfo {
            method_id: self.method_id,
            instructions: CoverageInfo::Extended {
                coverage: self.instructions,
            },
            lines: CoverageInfo::Extended { coverage: self.lines },
            branches: CoverageInfo::Extended {
                coverage: self.branches,
            },
        }
    }

    fn finish_incomplete(self, class_id: &ClassId) -> MethodCoverageInfo {
        tracing::warn!(
            "{}: method {}{} starting at line {} matched {} of {} lines",
            class_id.name,
            self.method_id.name,
            self.method_id.descriptor,
            self.start_line,
            self.lines.len(),
            self.expected_lines
        );
        self.finish()
    }
}

/// Aggregate counters straight from the method element.
fn basic(method: &Method) -> MethodCoverageInfo {
    let (covered_instructions, total_instructions) = method.counter("INSTRUCTION");
    let (covered_lines, total_lines) = method.counter("LINE");
    let (covered_branches, total_branches) = method.counter("BRANCH");
    MethodCoverageInfo {
        method_id: MethodId::new(&method.name, &method.desc),
        instructions: CoverageInfo::basic(covered_instructions, total_instructions),
        lines: CoverageInfo::basic(covered_lines, total_lines),
        branches: CoverageInfo::basic(covered_branches, total_branches),
    }
}

/// Build per-method coverage for one class of a report.
///
/// Default constructors, static initializers and methods without line
/// information get `Basic` counts. Every other method gets `Extended`
/// coverage over the lines attributed to it. A method whose span could not be
/// fully matched is kept with the lines it did get and a warning is logged.
pub fn class_coverage(
    class_id: ClassId,
    class: &Class,
    source: Option<&SourceFile>,
) -> ClassCoverageInfo {
    let mut methods = Vec::with_capacity(class.methods.len());
    let mut ranged = Vec::new();

    for method in &class.methods {
        match method.line {
            Some(start_line) if !method.is_discontinuous() => ranged.push((start_line, method)),
            _ => methods.push(basic(method)),
        }
    }

    let Some(source) = source else {
        if !ranged.is_empty() {
            tracing::warn!(
                "{}: no source file entry in coverage report, using method totals",
                class_id.name
            );
        }
        methods.extend(ranged.into_iter().map(|(_, method)| basic(method)));
        return ClassCoverageInfo::new(class_id, methods);
    };

    // Stable sort keeps declaration order for methods sharing a start line
    ranged.sort_by_key(|(start_line, _)| *start_line);
    let mut pending = ranged.into_iter().peekable();

    let mut lines: Vec<&Line> = source.lines.iter().collect();
    lines.sort_by_key(|line| line.nr);

    let mut open: Option<Bucket> = None;
    for line in lines {
        // The first line at or after a method's start opens it, even when the
        // declared start line itself carries no instructions
        while let Some((start_line, method)) = pending.next_if(|(start, _)| *start <= line.nr) {
            if let Some(bucket) = open.take() {
                methods.push(bucket.finish_incomplete(&class_id));
            }
            let bucket = Bucket::new(method, start_line);
            if bucket.expected_lines == 0 {
                methods.push(bucket.finish());
            } else {
                open = Some(bucket);
            }
        }

        if line.instructions() == 0 {
            continue;
        }
        let Some(bucket) = open.as_mut() else {
            continue;
        };
        bucket.add(&source.name, line);
        if bucket.is_complete() {
            if let Some(bucket) = open.take() {
                methods.push(bucket.finish());
            }
        }
    }

    if let Some(bucket) = open.take() {
        methods.push(bucket.finish_incomplete(&class_id));
    }
    for (start_line, method) in pending {
        let bucket = Bucket::new(method, start_line);
        if bucket.expected_lines == 0 {
            methods.push(bucket.finish());
        } else {
            methods.push(bucket.finish_incomplete(&class_id));
        }
    }

    ClassCoverageInfo::new(class_id, methods)
}
