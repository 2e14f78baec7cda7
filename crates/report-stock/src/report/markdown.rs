//! Markdown report assembly

use async_trait::async_trait;
use report_forecast::ForecastArtifact;
use report_pipeline::{
    Assembler, AssemblyInput, ChartKind, CollaboratorError, StageStatus,
};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Shown instead of the narrative when the Narrate stage did not succeed
pub const NARRATIVE_FALLBACK: &str = "The written analysis is unavailable for this run. \
The charts and forecast table above were produced from the same data and remain valid.";

/// Writes `<output_dir>/<TICKER>_report_<run id>.md`
#[derive(Debug, Clone)]
pub struct MarkdownAssembler {
    output_dir: PathBuf,
}

impl MarkdownAssembler {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Render the document without writing it
    pub fn render(&self, input: &AssemblyInput) -> String {
        let inputs = &input.inputs;
        let ticker = &inputs.request.ticker;
        let mut doc = String::new();

        let _ = writeln!(doc, "# {ticker} Stock Report\n");
        let _ = writeln!(
            doc,
            "Generated {} | run `{}` | report window {} | forecast window {}\n",
            input.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            inputs.run_id,
            inputs.request.report_window,
            inputs.request.forecast_window,
        );
        doc.push_str(&status_banner(input));

        doc.push_str("## Forecast\n\n");
        let _ = writeln!(
            doc,
            "Quantile forecast from the close of {:.2} at {}, artifact `{}`.\n",
            inputs.artifact.last_close(),
            inputs.artifact.last_timestamp().format("%Y-%m-%d %H:%M"),
            inputs.artifact.id(),
        );
        doc.push_str(&forecast_table(&inputs.artifact));
        doc.push('\n');

        doc.push_str("## Charts\n\n");
        for kind in ChartKind::ALL {
            match input.charts.iter().find(|c| c.kind == kind) {
                Some(chart) => {
                    let _ = writeln!(
                        doc,
                        "### {}\n\n![{}]({})\n",
                        kind.title(),
                        kind.title(),
                        self.link(&chart.path)
                    );
                }
                None => {
                    let _ = writeln!(
                        doc,
                        "### {}\n\n> Chart not available for this run.\n",
                        kind.title()
                    );
                }
            }
        }

        doc.push_str("## Analysis\n\n");
        match &input.narrative {
            Some(narrative) => {
                for section in &narrative.sections {
                    let _ = writeln!(doc, "### {}\n\n{}\n", section.title, section.body);
                }
                let _ = writeln!(doc, "_Narrative by {}._\n", narrative.author);
            }
            None => {
                let _ = writeln!(doc, "> {NARRATIVE_FALLBACK}\n");
            }
        }

        doc.push_str("## Model Diagnostics\n\n");
        let diagnostics = inputs.artifact.diagnostics();
        let _ = writeln!(
            doc,
            "{} training samples, {} features, seed {}, {} quantile crossings repaired, \
             mean calibration error {:.3}.",
            diagnostics.training_samples,
            diagnostics.feature_names.len(),
            diagnostics.seed,
            diagnostics.crossings_repaired,
            diagnostics.mean_calibration_error(),
        );
        doc
    }

    /// Chart path relative to the report when it lives below the output dir
    fn link(&self, path: &Path) -> String {
        path.strip_prefix(&self.output_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

fn status_banner(input: &AssemblyInput) -> String {
    let mut banner = String::new();
    if input.notices.is_empty() {
        banner.push_str("> **Status: OK.** Every stage completed.\n\n");
        return banner;
    }
    banner.push_str("> **Status: DEGRADED.** Some stages did not complete:\n");
    for notice in &input.notices {
        let status = match notice.status {
            StageStatus::Skipped => "skipped",
            StageStatus::Failed => "failed",
            StageStatus::Ok => "ok",
        };
        let _ = writeln!(
            banner,
            "> - `{}` {status}: {}",
            notice.stage,
            notice.reason.as_deref().unwrap_or("no reason recorded")
        );
    }
    banner.push('\n');
    banner
}

/// Markdown table with one row per horizon step and one column per level
pub fn forecast_table(artifact: &ForecastArtifact) -> String {
    let levels = artifact.levels();
    let mut table = String::from("| Step | Time |");
    for level in &levels {
        let _ = write!(table, " {} |", level.label());
    }
    table.push_str("\n|---|---|");
    table.push_str(&"---:|".repeat(levels.len()));
    table.push('\n');

    for (i, ts) in artifact.step_timestamps().iter().enumerate() {
        let step = i + 1;
        let _ = write!(table, "| {step} | {} |", ts.format("%Y-%m-%d %H:%M"));
        for value in artifact.values_at(step) {
            let _ = write!(table, " {value:.2} |");
        }
        table.push('\n');
    }
    if let Some(&end) = artifact.curve(0.5).and_then(|c| c.values.last()) {
        let change = (end / artifact.last_close() - 1.0) * 100.0;
        let _ = writeln!(table, "\nMedian path ends at {end:.2} ({change:+.2}% from the last close).");
    }
    table
}

#[async_trait]
impl Assembler for MarkdownAssembler {
    #[instrument(skip(self, input), fields(ticker = %input.inputs.request.ticker, run_id = %input.inputs.run_id))]
    async fn assemble(&self, input: &AssemblyInput) -> Result<PathBuf, CollaboratorError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(format!(
            "{}_report_{}.md",
            input.inputs.request.ticker, input.inputs.run_id
        ));
        let tmp = path.with_extension("md.tmp");
        tokio::fs::write(&tmp, self.render(input)).await?;
        tokio::fs::rename(&tmp, &path).await?;

        info!(
            path = %path.display(),
            charts = input.charts.len(),
            narrative = input.narrative.is_some(),
            "Report assembled"
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_inputs;
    use chrono::Utc;
    use report_pipeline::{
        ChartFile, Narrative, NarrativeSection, REQUIRED_SECTIONS, Stage, StageResult,
    };

    fn narrative() -> Narrative {
        Narrative {
            sections: REQUIRED_SECTIONS
                .iter()
                .map(|s| NarrativeSection {
                    title: (*s).to_string(),
                    body: format!("Body of {s}."),
                })
                .collect(),
            author: "test/model".to_string(),
        }
    }

    fn input(dir: &Path, with_narrative: bool, chart_kinds: &[ChartKind]) -> AssemblyInput {
        let notices = if with_narrative {
            Vec::new()
        } else {
            vec![StageResult::not_ok(
                Stage::Narrate,
                StageStatus::Skipped,
                Utc::now(),
                90_000,
                "Stage timed out after 90s",
                "transient_upstream",
            )]
        };
        AssemblyInput {
            inputs: sample_inputs(120),
            generated_at: Utc::now(),
            charts: chart_kinds
                .iter()
                .map(|&kind| ChartFile {
                    kind,
                    path: dir.join("TST").join(format!("{}.svg", kind.file_stem())),
                })
                .collect(),
            narrative: with_narrative.then(narrative),
            notices,
        }
    }

    #[test]
    fn test_complete_report() {
        let assembler = MarkdownAssembler::new("/reports");
        let doc = assembler.render(&input(Path::new("/reports"), true, &ChartKind::ALL));

        assert!(doc.starts_with("# TST Stock Report"));
        assert!(doc.contains("Status: OK"));
        assert!(doc.contains("![Quantile Forecast](TST/forecast_fan.svg)"));
        for section in REQUIRED_SECTIONS {
            assert!(doc.contains(&format!("### {section}\n\nBody of {section}.")));
        }
        assert!(!doc.contains(NARRATIVE_FALLBACK));
        assert!(doc.contains("## Model Diagnostics"));
    }

    #[test]
    fn test_degraded_report_has_banner_and_fallback() {
        let assembler = MarkdownAssembler::new("/reports");
        let doc = assembler.render(&input(
            Path::new("/reports"),
            false,
            &[ChartKind::MovingAverage, ChartKind::ForecastFan],
        ));

        assert!(doc.contains("Status: DEGRADED"));
        assert!(doc.contains("`narrate` skipped: Stage timed out after 90s"));
        assert!(doc.contains(NARRATIVE_FALLBACK));
        assert!(doc.contains("### Momentum (MACD and RSI)\n\n> Chart not available"));
        assert!(doc.contains("![Price and Moving Averages]"));
    }

    #[test]
    fn test_forecast_table_shape() {
        let inputs = sample_inputs(120);
        let table = forecast_table(&inputs.artifact);
        let rows: Vec<&str> = table.lines().filter(|l| l.starts_with("| ")).collect();
        // header plus one row per step
        assert_eq!(rows.len(), 1 + inputs.artifact.horizon());
        assert!(rows[0].contains("q10 | q50 | q90"));
        assert!(table.contains("Median path ends at"));
    }

    #[tokio::test]
    async fn test_assemble_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let assembler = MarkdownAssembler::new(dir.path());
        let input = input(dir.path(), true, &ChartKind::ALL);

        let path = assembler.assemble(&input).await.unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            format!("TST_report_{}.md", input.inputs.run_id)
        );
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("## Analysis"));
        assert!(!path.with_extension("md.tmp").exists());
    }
}
