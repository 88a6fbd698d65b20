use crate::catalog::PRICING_VERSION;
use crate::ledger::{PeakContext, RunningTotals, UsageLedger, UsageRecord};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Writes the narrative. `.html` targets get a minimal escaped page; every
/// other extension is plain text.
pub fn write_narrative(path: &Path, text: &str) -> Result<()> {
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
    let body = match ext {
        "html" | "htm" => to_html(text),
        _ => format!("{}\n", text.trim_end()),
    };
    write_creating_dirs(path, &body)
}

fn to_html(text: &str) -> String {
    let mut out = String::from(
        "<html><head><meta charset=\"utf-8\"><title>rusty-narrative</title></head><body>\n",
    );
    for para in text.split("\n\n").filter(|p| !p.trim().is_empty()) {
        out.push_str(&format!("<p>{}</p>\n", html_escape::encode_text(para.trim())));
    }
    out.push_str("</body></html>\n");
    out
}

fn write_creating_dirs(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
}

#[derive(Debug, Serialize)]
pub struct UsageReport {
    pub generated_at: String,
    pub pricing_version: &'static str,
    pub provider: String,
    pub model: String,
    pub records: Vec<UsageRecord>,
    pub totals: RunningTotals,
    pub peak: Option<PeakContext>,
    /// 1-based numbers of chunks that could not be generated.
    pub failed_chunks: Vec<usize>,
}

impl UsageReport {
    pub fn from_ledger(ledger: &UsageLedger, provider: &str, model: &str, failed_chunks: Vec<usize>) -> Result<Self> {
        let generated_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .context("formatting report timestamp")?;
        Ok(Self {
            generated_at,
            pricing_version: PRICING_VERSION,
            provider: provider.to_string(),
            model: model.to_string(),
            records: ledger.records(),
            totals: ledger.running_totals(),
            peak: ledger.peak(),
            failed_chunks,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        write_creating_dirs(path, &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ProviderKind;

    #[test]
    fn plain_text_output_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("story.txt");
        write_narrative(&path, "First part.\n\nSecond part.").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "First part.\n\nSecond part.\n");
    }

    #[test]
    fn html_output_is_escaped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("story.html");
        write_narrative(&path, "I said <hello> & left.\n\nThe end.").unwrap();
        let html = fs::read_to_string(&path).unwrap();
        assert!(html.contains("<p>I said &lt;hello&gt; &amp; left.</p>"));
        assert!(html.contains("<p>The end.</p>"));
    }

    #[test]
    fn usage_report_carries_ledger_state() {
        let ledger = UsageLedger::new();
        ledger.record(UsageRecord {
            chunk_index: 0,
            provider: ProviderKind::Gemini,
            model: "gemini-2.0-flash".into(),
            input_tokens: 1000,
            output_tokens: 200,
            cost: Some(0.00018),
        });
        let report = UsageReport::from_ledger(&ledger, "gemini", "gemini-2.0-flash", vec![2]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.json");
        report.save(&path).unwrap();

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["pricing_version"], PRICING_VERSION);
        assert_eq!(json["totals"]["input_tokens"], 1000);
        assert_eq!(json["records"][0]["provider"], "gemini");
        assert_eq!(json["failed_chunks"][0], 2);
        assert_eq!(json["peak"]["tokens"], 1200);
        assert!(json["generated_at"].as_str().unwrap().contains('T'));
    }
}
