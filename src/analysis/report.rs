//! Result rows, their CSV rendering and the per-tool summary.

use crate::model::Fraction;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;

pub const CSV_HEADER: [&str; 19] = [
    "tool",
    "runName",
    "iteration",
    "buildId",
    "klass",
    "compiled tests",
    "total tests",
    "compilation rate",
    "covered lines",
    "total lines",
    "line coverage",
    "covered branches",
    "total branches",
    "branch coverage",
    "killed mutants",
    "total mutants",
    "mutation score",
    "failure reproduction",
    "cyclomatic complexity",
];

/// Everything measured for one (tool, run, benchmark) triple.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRow {
    pub tool: String,
    pub run_name: String,
    pub iteration: Option<u32>,
    pub build_id: String,
    pub klass: String,
    pub compilation_rate: Fraction,
    pub lines: Fraction,
    pub branches: Fraction,
    pub mutation_score: Fraction,
    /// `None` when no patched variant was evaluated
    pub reproduction: Option<bool>,
    pub complexity: Option<u64>,
}

fn percent(fraction: Fraction) -> String {
    format!("{:.2}", fraction.percent())
}

impl AnalysisRow {
    pub fn csv_fields(&self) -> Vec<String> {
        vec![
            self.tool.clone(),
            self.run_name.clone(),
            self.iteration.map(|i| i.to_string()).unwrap_or_default(),
            self.build_id.clone(),
            self.klass.clone(),
            self.compilation_rate.numerator.to_string(),
            self.compilation_rate.denominator.to_string(),
            percent(self.compilation_rate),
            self.lines.numerator.to_string(),
            self.lines.denominator.to_string(),
            percent(self.lines),
            self.branches.numerator.to_string(),
            self.branches.denominator.to_string(),
            percent(self.branches),
            self.mutation_score.numerator.to_string(),
            self.mutation_score.denominator.to_string(),
            percent(self.mutation_score),
            match self.reproduction {
                Some(true) => "100.00".to_string(),
                Some(false) => "0.00".to_string(),
                None => String::new(),
            },
            self.complexity.map(|c| c.to_string()).unwrap_or_default(),
        ]
    }
}

/// Quote a field when it contains a separator, quote or line break.
fn escape(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// One CSV record, newline-terminated.
pub fn csv_line<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = fields
        .iter()
        .map(|f| escape(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

/// Mean percentages over every benchmark a tool was evaluated on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSummary {
    pub benchmarks: usize,
    pub compilation_rate: f64,
    pub line_coverage: f64,
    pub branch_coverage: f64,
    pub mutation_score: f64,
    pub reproduced: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub generated_at: DateTime<Utc>,
    pub tools: BTreeMap<String, ToolSummary>,
}

impl AnalysisSummary {
    pub fn from_rows(rows: &[AnalysisRow]) -> Self {
        let mut grouped: BTreeMap<&str, Vec<&AnalysisRow>> = BTreeMap::new();
        for row in rows {
            grouped.entry(row.tool.as_str()).or_default().push(row);
        }

        let tools = grouped
            .into_iter()
            .map(|(tool, rows)| {
                let mean = |f: fn(&AnalysisRow) -> Fraction| {
                    rows.iter().map(|r| f(r).percent()).sum::<f64>() / rows.len() as f64
                };
                let summary = ToolSummary {
                    benchmarks: rows.len(),
                    compilation_rate: mean(|r| r.compilation_rate),
                    line_coverage: mean(|r| r.lines),
                    branch_coverage: mean(|r| r.branches),
                    mutation_score: mean(|r| r.mutation_score),
                    reproduced: rows.iter().filter(|r| r.reproduction == Some(true)).count(),
                };
                (tool.to_string(), summary)
            })
            .collect();

        Self {
            generated_at: Utc::now(),
            tools,
        }
    }

    pub fn log(&self) {
        for (tool, summary) in &self.tools {
            tracing::info!(
                "{}: {} benchmarks, compilation {:.2}%, lines {:.2}%, branches {:.2}%, mutation score {:.2}%",
                tool,
                summary.benchmarks,
                summary.compilation_rate,
                summary.line_coverage,
                summary.branch_coverage,
                summary.mutation_score
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(tool: &str, lines: Fraction) -> AnalysisRow {
        AnalysisRow {
            tool: tool.to_string(),
            run_name: "run".to_string(),
            iteration: Some(0),
            build_id: "foo-1".to_string(),
            klass: "com.example.Foo".to_string(),
            compilation_rate: Fraction::new(1, 2),
            lines,
            branches: Fraction::ZERO,
            mutation_score: Fraction::new(2, 3),
            reproduction: None,
            complexity: Some(7),
        }
    }

    #[test]
    fn test_csv_row_formatting() {
        let line = csv_line(&row("evosuite", Fraction::new(3, 4)).csv_fields());
        assert_eq!(
            line,
            "evosuite,run,0,foo-1,com.example.Foo,1,2,50.00,3,4,75.00,0,0,0.00,2,3,66.67,,7\n"
        );
    }

    #[test]
    fn test_header_matches_row_width() {
        assert_eq!(row("t", Fraction::ZERO).csv_fields().len(), CSV_HEADER.len());
    }

    #[test]
    fn test_fields_are_quoted_when_needed() {
        assert_eq!(csv_line(&["a,b", "say \"hi\"", "plain"]), "\"a,b\",\"say \"\"hi\"\"\",plain\n");
    }

    #[test]
    fn test_summary_means_per_tool() {
        let mut reproduced = row("kex", Fraction::new(1, 1));
        reproduced.reproduction = Some(true);
        let rows = vec![
            row("kex", Fraction::new(1, 2)),
            reproduced,
            row("evosuite", Fraction::ZERO),
        ];

        let summary = AnalysisSummary::from_rows(&rows);
        assert_eq!(summary.tools.len(), 2);

        let kex = &summary.tools["kex"];
        assert_eq!(kex.benchmarks, 2);
        assert!((kex.line_coverage - 75.0).abs() < 1e-9);
        assert!((kex.compilation_rate - 50.0).abs() < 1e-9);
        assert_eq!(kex.reproduced, 1);

        let evosuite = &summary.tools["evosuite"];
        assert_eq!(evosuite.line_coverage, 0.0);
        assert_eq!(evosuite.branch_coverage, 0.0);
    }
}
