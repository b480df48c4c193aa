use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::types::{OcrEngine, OcrLine, OcrPageResult};
use super::NormalizeError;
use crate::config::OcrConfig;
use crate::models::BoundingBox;

/// Tesseract invoked as an external process (`tesseract stdin stdout -l <langs> tsv`).
pub struct TesseractCli {
    binary: PathBuf,
    timeout: Duration,
}

impl TesseractCli {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(&config.tesseract_path, Duration::from_secs(config.timeout_secs))
    }

    async fn run(&self, image_bytes: &[u8], languages: &str) -> Result<String, NormalizeError> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", languages, "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                NormalizeError::Ocr(format!("cannot start {}: {e}", self.binary.display()))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| NormalizeError::Ocr("tesseract stdin unavailable".into()))?;
        stdin.write_all(image_bytes).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NormalizeError::Ocr(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        String::from_utf8(output.stdout)
            .map_err(|e| NormalizeError::Ocr(format!("tesseract output is not UTF-8: {e}")))
    }
}

#[async_trait]
impl OcrEngine for TesseractCli {
    async fn recognize(
        &self,
        image_bytes: &[u8],
        languages: &str,
    ) -> Result<OcrPageResult, NormalizeError> {
        let tsv = tokio::time::timeout(self.timeout, self.run(image_bytes, languages))
            .await
            .map_err(|_| {
                NormalizeError::Ocr(format!("tesseract timed out after {:?}", self.timeout))
            })??;

        let result = parse_tsv(&tsv);
        tracing::debug!(
            lines = result.lines.len(),
            confidence = result.confidence,
            languages,
            "Tesseract page recognized"
        );
        Ok(result)
    }
}

/// One level-5 (word) row of Tesseract TSV output.
struct TsvWord<'a> {
    line_key: (u32, u32, u32, u32),
    text: &'a str,
    confidence: Option<f32>,
    bounding_box: Option<BoundingBox>,
}

/// Parse Tesseract TSV output into lines.
/// TSV columns: level page_num block_num par_num line_num word_num left top width height conf text
/// Words are grouped by (page, block, paragraph, line). Confidence is 0-100,
/// scaled to 0.0-1.0; words with -1 confidence are kept but not averaged.
pub fn parse_tsv(tsv: &str) -> OcrPageResult {
    let words: Vec<TsvWord<'_>> = tsv.lines().skip(1).filter_map(parse_tsv_word).collect();

    let mut lines: Vec<OcrLine> = Vec::new();
    let mut all_confidences: Vec<f32> = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let key = words[start].line_key;
        let end = words[start..]
            .iter()
            .position(|w| w.line_key != key)
            .map_or(words.len(), |offset| start + offset);
        let group = &words[start..end];

        let text = group.iter().map(|w| w.text).collect::<Vec<_>>().join(" ");
        let confidences: Vec<f32> = group.iter().filter_map(|w| w.confidence).collect();
        all_confidences.extend(&confidences);
        lines.push(OcrLine {
            text,
            confidence: mean(&confidences),
            bounding_box: union_boxes(group.iter().filter_map(|w| w.bounding_box.as_ref())),
        });
        start = end;
    }

    OcrPageResult {
        text: lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        confidence: mean(&all_confidences),
        lines,
    }
}

fn parse_tsv_word(line: &str) -> Option<TsvWord<'_>> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 12 || fields[0].trim() != "5" {
        return None;
    }
    let text = fields[11].trim();
    if text.is_empty() {
        return None;
    }
    let key_part = |i: usize| fields[i].trim().parse::<u32>().ok();
    let line_key = (key_part(1)?, key_part(2)?, key_part(3)?, key_part(4)?);

    // Tesseract 4+ prints fractional confidences; -1 means "no confidence".
    let confidence = fields[10]
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|c| *c >= 0.0)
        .map(|c| (c / 100.0).min(1.0));

    Some(TsvWord {
        line_key,
        text,
        confidence,
        bounding_box: parse_bounding_box(fields[6], fields[7], fields[8], fields[9]),
    })
}

/// Parse bounding box coordinates from TSV string fields.
/// Returns None if any field fails to parse.
fn parse_bounding_box(left: &str, top: &str, width: &str, height: &str) -> Option<BoundingBox> {
    Some(BoundingBox {
        x: left.trim().parse().ok()?,
        y: top.trim().parse().ok()?,
        width: width.trim().parse().ok()?,
        height: height.trim().parse().ok()?,
    })
}

fn union_boxes<'a>(boxes: impl Iterator<Item = &'a BoundingBox>) -> Option<BoundingBox> {
    boxes.fold(None, |acc: Option<BoundingBox>, b| {
        Some(match acc {
            None => b.clone(),
            Some(a) => {
                let x = a.x.min(b.x);
                let y = a.y.min(b.y);
                let right = (a.x + a.width).max(b.x + b.width);
                let bottom = (a.y + a.height).max(b.y + b.height);
                BoundingBox {
                    x,
                    y,
                    width: right - x,
                    height: bottom - y,
                }
            }
        })
    })
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

/// Mock OCR engine for unit testing without Tesseract.
pub struct MockOcrEngine {
    pub text: String,
    pub confidence: f32,
    /// When set, every call fails with this reason.
    pub failure: Option<String>,
    calls: AtomicUsize,
}

impl MockOcrEngine {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            text: text.to_string(),
            confidence,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::new("", 0.0)
        }
    }

    /// Number of `recognize` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for MockOcrEngine {
    async fn recognize(
        &self,
        _image_bytes: &[u8],
        _languages: &str,
    ) -> Result<OcrPageResult, NormalizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.failure {
            return Err(NormalizeError::Ocr(reason.clone()));
        }
        let lines = self
            .text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| OcrLine {
                text: l.to_string(),
                confidence: self.confidence,
                bounding_box: None,
            })
            .collect();
        Ok(OcrPageResult {
            text: self.text.clone(),
            confidence: self.confidence,
            lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn tsv(rows: &[&str]) -> String {
        let mut out = HEADER.to_string();
        for row in rows {
            out.push('\n');
            out.push_str(row);
        }
        out
    }

    #[test]
    fn groups_words_into_lines() {
        let input = tsv(&[
            "1\t1\t0\t0\t0\t0\t0\t0\t1000\t1400\t-1\t",
            "4\t1\t1\t1\t1\t0\t100\t50\t300\t30\t-1\t",
            "5\t1\t1\t1\t1\t1\t100\t50\t120\t30\t96.5\tFACTURA",
            "5\t1\t1\t1\t1\t2\t230\t52\t170\t28\t91\t2024-001",
            "5\t1\t1\t1\t2\t1\t100\t90\t80\t30\t88\tTotal:",
            "5\t1\t1\t1\t2\t2\t190\t90\t90\t30\t-1\t121,00",
        ]);
        let result = parse_tsv(&input);
        assert_eq!(result.lines.len(), 2);
        assert_eq!(result.lines[0].text, "FACTURA 2024-001");
        assert_eq!(result.lines[1].text, "Total: 121,00");
        assert_eq!(result.text, "FACTURA 2024-001\nTotal: 121,00");

        let first = &result.lines[0];
        assert!((first.confidence - 0.9375).abs() < 1e-4);
        assert_eq!(
            first.bounding_box,
            Some(BoundingBox { x: 100, y: 50, width: 300, height: 30 })
        );
        // -1 is excluded from the averages
        assert!((result.lines[1].confidence - 0.88).abs() < 1e-4);
        assert!((result.confidence - (0.965 + 0.91 + 0.88) / 3.0).abs() < 1e-4);
    }

    #[test]
    fn skips_blank_words_and_short_rows() {
        let input = tsv(&["5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t90\t   ", "5\t1\t1"]);
        let result = parse_tsv(&input);
        assert!(result.lines.is_empty());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn bad_bounding_box_degrades_to_none() {
        let input = tsv(&["5\t1\t1\t1\t1\t1\tx\t0\t10\t10\t80\tHola"]);
        let result = parse_tsv(&input);
        assert_eq!(result.lines[0].bounding_box, None);
        assert_eq!(result.lines[0].text, "Hola");
    }

    #[tokio::test]
    async fn mock_engine_returns_lines_and_counts_calls() {
        let engine = MockOcrEngine::new("CONTRATO\n\nCláusula primera", 0.8);
        let result = engine.recognize(b"img", "spa").await.unwrap();
        assert_eq!(result.lines.len(), 2);
        assert_eq!(engine.calls(), 1);
    }

    #[tokio::test]
    async fn mock_engine_failure() {
        let engine = MockOcrEngine::failing("engine crashed");
        let err = engine.recognize(b"img", "spa").await.unwrap_err();
        assert!(err.to_string().contains("engine crashed"));
    }

    #[tokio::test]
    async fn missing_tesseract_binary_is_ocr_error() {
        let engine = TesseractCli::new("/nonexistent/tesseract-bin", Duration::from_secs(5));
        let err = engine.recognize(b"img", "eng").await.unwrap_err();
        assert!(matches!(err, NormalizeError::Ocr(_)));
    }
}
